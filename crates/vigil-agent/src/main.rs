//! Vigil host agent: collects pool and device state and writes one JSON
//! report per cycle to stdout for the transport to pick up.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use schemars::schema_for;
use serde_json::{to_string, to_string_pretty};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{
    select, signal,
    task::{self, JoinHandle},
    time::{interval, MissedTickBehavior},
};
use vigil_core::{logging, Report, VigilConfig, VigilResult};
use vigil_zfs::{CancelToken, ZfsCollector};

const DEFAULT_CONFIG: &str = "/etc/vigil/agent.toml";

#[derive(Parser, Debug)]
#[command(
    name = "vigil-agent",
    version,
    about = "ZFS pool and drive state collector for Vigil."
)]
struct Cli {
    /// Path to the agent configuration file; built-in defaults apply when it is absent.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single collection cycle and print the report.
    Collect {
        /// Pretty-print the JSON report.
        #[arg(long)]
        pretty: bool,
    },

    /// Collect on the configured interval until interrupted.
    Run,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate (defaults to --config).
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = run().await {
        error!("agent exit: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Collect { pretty } => {
            let config = Arc::new(load_config(&cli.config)?);
            let report = spawn_cycle(config, CancelToken::new())
                .await
                .context("collection task failed")?
                .context("collect zfs state")?;
            print_report(&report, pretty)?;
        }
        Commands::Run => {
            let config = Arc::new(load_config(&cli.config)?);
            run_agent(config).await?;
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(VigilConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let file = file.unwrap_or(cli.config);
            let cfg = VigilConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;
            println!(
                "Configuration valid (interval {}s, zfs timeout {}s, serial probing {}).",
                cfg.agent.interval_secs,
                cfg.zfs.timeout_secs,
                if cfg.serial.enabled { "on" } else { "off" }
            );
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<VigilConfig> {
    VigilConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Collection shells out and blocks, so each cycle runs on the blocking pool.
fn spawn_cycle(config: Arc<VigilConfig>, cancel: CancelToken) -> JoinHandle<VigilResult<Report>> {
    task::spawn_blocking(move || ZfsCollector::from_config(&config, cancel).collect())
}

async fn run_agent(config: Arc<VigilConfig>) -> Result<()> {
    let cancel = CancelToken::new();
    let mut ticker = interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Vigil agent started (config: {}, interval {}s)",
        config.path.display(),
        config.agent.interval_secs
    );

    loop {
        select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => {
                info!("received shutdown signal");
                return Ok(());
            }
        }

        let mut cycle = spawn_cycle(config.clone(), cancel.clone());
        select! {
            res = &mut cycle => match res.context("collection task failed")? {
                Ok(report) => {
                    info!(
                        "cycle complete: {} pool(s), zfs available: {}",
                        report.pools.len(),
                        report.zfs_available
                    );
                    print_report(&report, false)?;
                }
                Err(err) => warn!("collection cycle failed: {err}"),
            },
            _ = signal::ctrl_c() => {
                info!("received shutdown signal; cancelling in-flight cycle");
                cancel.cancel();
                // the cycle returns Cancelled once its children are killed
                if let Ok(Err(err)) = cycle.await {
                    info!("{err}");
                }
                return Ok(());
            }
        }
    }
}

fn print_report(report: &Report, pretty: bool) -> Result<()> {
    let json = if pretty {
        to_string_pretty(report)?
    } else {
        to_string(report)?
    };
    println!("{json}");
    Ok(())
}
