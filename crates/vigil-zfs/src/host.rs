//! Host identifier attached to every report.

use crate::command::CommandRunner;
use log::debug;
use std::fs;
use std::path::PathBuf;
use vigil_core::error::{VigilError, VigilResult};

pub const UNKNOWN_HOST: &str = "unknown";

/// Configured name, then procfs, then the `hostname` tool.
#[derive(Debug, Clone)]
pub struct HostnameSource {
    configured: Option<String>,
    proc_root: PathBuf,
    tool: Option<CommandRunner>,
}

impl HostnameSource {
    pub fn new(configured: Option<String>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            configured: configured.filter(|h| !h.trim().is_empty()),
            proc_root: proc_root.into(),
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: Option<CommandRunner>) -> Self {
        self.tool = tool;
        self
    }

    pub fn detect(&self) -> VigilResult<String> {
        if let Some(name) = &self.configured {
            return Ok(name.trim().to_string());
        }

        let proc_file = self.proc_root.join("sys/kernel/hostname");
        if let Ok(raw) = fs::read_to_string(&proc_file) {
            let name = raw.trim();
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        }

        if let Some(tool) = &self.tool {
            match tool.run(&[]) {
                Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                    return Ok(out.stdout.trim().to_string());
                }
                Ok(out) => debug!("hostname exited with {}: {}", out.status, out.diagnostic()),
                Err(VigilError::Cancelled) => return Err(VigilError::Cancelled),
                Err(err) => debug!("hostname failed: {err}"),
            }
        }

        Ok(UNKNOWN_HOST.to_string())
    }
}
