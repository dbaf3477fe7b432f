//! System-backed `ZpoolTool` implementation. It shells out to the host's
//! `zpool` binary and hands the raw text back to the collector.

use crate::command::{CancelToken, CommandRunner};
use crate::list::{is_no_pools_message, LIST_COLUMNS};
use crate::locate::ToolLocator;
use vigil_core::error::{VigilError, VigilResult};
use vigil_core::provider::{ToolOutput, ZpoolTool};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `ZpoolTool` that runs the native `zpool` CLI.
#[derive(Clone)]
pub struct SystemZpool {
    runner: Option<CommandRunner>,
}

impl SystemZpool {
    /// Look `zpool` up through `locator`; a missing binary yields an
    /// unavailable tool rather than an error.
    pub fn from_locator(locator: &ToolLocator, timeout: Duration, cancel: &CancelToken) -> Self {
        Self {
            runner: locator.runner("zpool", timeout, cancel),
        }
    }

    /// A tool with no binary behind it; every call is `ToolUnavailable`.
    pub fn unavailable() -> Self {
        Self { runner: None }
    }

    /// Construct a tool around an explicit `zpool` binary.
    pub fn with_path(path: PathBuf, timeout: Duration, cancel: CancelToken) -> VigilResult<Self> {
        if !path.exists() {
            return Err(VigilError::InvalidConfig(format!(
                "binary not found at {}",
                path.display()
            )));
        }
        Ok(Self {
            runner: Some(CommandRunner::new(path, timeout, cancel)),
        })
    }

    pub fn binary(&self) -> Option<&Path> {
        self.runner.as_ref().map(CommandRunner::binary)
    }

    /// Run `zpool` with arguments.
    fn run_zpool(&self, args: &[&str]) -> VigilResult<ToolOutput> {
        match &self.runner {
            Some(runner) => runner.run(args),
            None => Err(VigilError::ToolUnavailable("zpool".to_string())),
        }
    }

    /// Run `zpool` and surface friendlier errors on failure.
    fn run_checked_zpool(&self, args: &[&str]) -> VigilResult<ToolOutput> {
        let out = self.run_zpool(args)?;
        if !out.success() {
            return Err(Self::classify_cli_error(
                self.binary().unwrap_or(Path::new("zpool")),
                args,
                &out,
            ));
        }
        Ok(out)
    }

    /// Map CLI output into a `VigilError` with context.
    fn classify_cli_error(binary: &Path, args: &[&str], output: &ToolOutput) -> VigilError {
        let diagnostic = output.diagnostic();
        let diagnostic_lower = diagnostic.to_ascii_lowercase();

        if diagnostic_lower.contains("no such pool")
            || diagnostic_lower.contains("pool does not exist")
        {
            return VigilError::Provider(format!(
                "{} {} reported missing pool: {}",
                binary.display(),
                args.join(" "),
                diagnostic
            ));
        }

        if diagnostic_lower.contains("permission denied") {
            return VigilError::Provider(format!(
                "{} {} needs elevated privileges: {}",
                binary.display(),
                args.join(" "),
                diagnostic
            ));
        }

        VigilError::Provider(format!(
            "{} {} exited with code {}: {}",
            binary.display(),
            args.join(" "),
            output.status,
            if diagnostic.is_empty() {
                "no additional output"
            } else {
                diagnostic
            }
        ))
    }
}

impl ZpoolTool for SystemZpool {
    fn available(&self) -> bool {
        self.runner.is_some()
    }

    /// A host without pools is not a failure: the output comes back empty.
    fn list(&self) -> VigilResult<ToolOutput> {
        let args = ["list", "-Hp", "-o", LIST_COLUMNS];
        let out = self.run_zpool(&args)?;
        if out.success() {
            return Ok(out);
        }
        if is_no_pools_message(out.diagnostic()) {
            return Ok(ToolOutput {
                stdout: String::new(),
                ..out
            });
        }
        Err(Self::classify_cli_error(
            self.binary().unwrap_or(Path::new("zpool")),
            &args,
            &out,
        ))
    }

    fn status(&self, pool: &str, resolve_paths: bool) -> VigilResult<ToolOutput> {
        if resolve_paths {
            self.run_checked_zpool(&["status", "-L", "-P", pool])
        } else {
            self.run_checked_zpool(&["status", pool])
        }
    }

    fn history(&self, pool: &str) -> VigilResult<ToolOutput> {
        self.run_checked_zpool(&["history", pool])
    }
}
