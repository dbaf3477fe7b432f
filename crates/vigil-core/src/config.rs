use crate::error::{VigilError, VigilResult};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentCfg {
    /// Host identifier reported upstream; detected when unset.
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for AgentCfg {
    fn default() -> Self {
        Self {
            hostname: None,
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZfsCfg {
    #[serde(default)]
    pub zpool_path: Option<String>,

    #[serde(default)]
    pub glabel_path: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Ask `zpool status` for real device paths (`-LP`) before the plain form.
    #[serde(default = "default_true")]
    pub resolve_paths: bool,

    #[serde(default)]
    pub collect_history: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ZfsCfg {
    fn default() -> Self {
        Self {
            zpool_path: None,
            glabel_path: None,
            timeout_secs: default_timeout_secs(),
            resolve_paths: true,
            collect_history: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SerialCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub smartctl_path: Option<String>,

    #[serde(default)]
    pub lsblk_path: Option<String>,

    #[serde(default)]
    pub hdparm_path: Option<String>,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_probe_timeout_secs() -> u64 {
    10
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            smartctl_path: None,
            lsblk_path: None,
            hdparm_path: None,
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Filesystem roots the resolver and correlator read from.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HostCfg {
    #[serde(default = "default_dev_root")]
    pub dev_root: String,

    #[serde(default = "default_sys_root")]
    pub sys_root: String,

    #[serde(default = "default_proc_root")]
    pub proc_root: String,
}

fn default_dev_root() -> String {
    "/dev".to_string()
}

fn default_sys_root() -> String {
    "/sys".to_string()
}

fn default_proc_root() -> String {
    "/proc".to_string()
}

impl Default for HostCfg {
    fn default() -> Self {
        Self {
            dev_root: default_dev_root(),
            sys_root: default_sys_root(),
            proc_root: default_proc_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VigilConfig {
    #[serde(default)]
    pub agent: AgentCfg,

    #[serde(default)]
    pub zfs: ZfsCfg,

    #[serde(default)]
    pub serial: SerialCfg,

    #[serde(default)]
    pub host: HostCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl VigilConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> VigilResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` if it exists, otherwise fall back to the built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> VigilResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("config {} not found; using defaults", path.display());
            Ok(Self {
                path: path.to_path_buf(),
                ..Self::default()
            })
        }
    }

    pub fn validate(&self) -> VigilResult<()> {
        if self.zfs.timeout_secs == 0 {
            return Err(VigilError::InvalidConfig(
                "zfs.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.serial.probe_timeout_secs == 0 {
            return Err(VigilError::InvalidConfig(
                "serial.probe_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.agent.interval_secs == 0 {
            return Err(VigilError::InvalidConfig(
                "agent.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn zfs_timeout(&self) -> Duration {
        Duration::from_secs(self.zfs.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.serial.probe_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.agent.interval_secs)
    }

    pub fn zpool_binary_path(&self) -> Option<PathBuf> {
        self.zfs.zpool_path.as_ref().map(PathBuf::from)
    }

    pub fn dev_root(&self) -> PathBuf {
        PathBuf::from(&self.host.dev_root)
    }

    pub fn sys_root(&self) -> PathBuf {
        PathBuf::from(&self.host.sys_root)
    }

    pub fn proc_root(&self) -> PathBuf {
        PathBuf::from(&self.host.proc_root)
    }

    /// Explicit overrides for the auxiliary tools, keyed by tool name.
    /// `zpool` is handled separately through `zpool_binary_path`.
    pub fn tool_overrides(&self) -> Vec<(&'static str, PathBuf)> {
        let candidates = [
            ("glabel", &self.zfs.glabel_path),
            ("smartctl", &self.serial.smartctl_path),
            ("lsblk", &self.serial.lsblk_path),
            ("hdparm", &self.serial.hdparm_path),
        ];
        candidates
            .into_iter()
            .filter_map(|(tool, path)| path.as_ref().map(|p| (tool, PathBuf::from(p))))
            .collect()
    }
}
