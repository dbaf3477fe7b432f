//! Logger setup for the agent. Records go to stderr; stdout carries the
//! JSON report hand-off.

use env_logger::{Builder, Env, Target};
use log::Record;
use serde_json::{json, Value};
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "VIGIL_LOG_FORMAT";
const LEVEL_ENV: &str = "VIGIL_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    /// `plain`/`text` select plain lines; anything else is JSON.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("plain") | Some("text") => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize the global logger once; later calls are no-ops.
///
/// `RUST_LOG` wins when set, then `VIGIL_LOG_LEVEL`, then `default_level`.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let format = LogFormat::from_setting(env::var(FORMAT_ENV).ok().as_deref());

    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.target(Target::Stderr);
    match format {
        LogFormat::Json => builder.format(|buf, record| {
            let line = json_line(&buf.timestamp().to_string(), record);
            writeln!(buf, "{line}")
        }),
        LogFormat::Plain => builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {} - {}",
                buf.timestamp(),
                record.level().as_str().to_ascii_lowercase(),
                component(record.target()),
                record.args()
            )
        }),
    };

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {err}");
    }
}

/// One JSON log line. `component` is the module within the vigil crate that
/// emitted the record, so log queries can filter on `collector` or `serial`.
fn json_line(timestamp: &str, record: &Record) -> Value {
    json!({
        "timestamp": timestamp,
        "level": record.level().as_str().to_ascii_lowercase(),
        "target": record.target(),
        "component": component(record.target()),
        "message": record.args().to_string(),
    })
}

/// `vigil_zfs::serial` → `serial`; foreign targets pass through.
fn component(target: &str) -> &str {
    if target.starts_with("vigil_") {
        target.rsplit("::").next().unwrap_or(target)
    } else {
        target
    }
}
