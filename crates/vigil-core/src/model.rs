//! Pool, vdev and scan records produced by one collection cycle.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Health of a pool or a single vdev as printed by `zpool`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Online,
    Degraded,
    Faulted,
    Offline,
    Removed,
    Unavail,
    Suspended,
    /// Hot spare waiting to be used.
    Avail,
    /// Hot spare currently replacing a member.
    InUse,
    #[default]
    Unknown,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Online => "ONLINE",
            HealthState::Degraded => "DEGRADED",
            HealthState::Faulted => "FAULTED",
            HealthState::Offline => "OFFLINE",
            HealthState::Removed => "REMOVED",
            HealthState::Unavail => "UNAVAIL",
            HealthState::Suspended => "SUSPENDED",
            HealthState::Avail => "AVAIL",
            HealthState::InUse => "INUSE",
            HealthState::Unknown => "UNKNOWN",
        }
    }
}

// Infallible: an unknown word must not stop the rest of the pool from being reported.
impl From<&str> for HealthState {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => HealthState::Online,
            "DEGRADED" => HealthState::Degraded,
            "FAULTED" => HealthState::Faulted,
            "OFFLINE" => HealthState::Offline,
            "REMOVED" => HealthState::Removed,
            "UNAVAIL" => HealthState::Unavail,
            "SUSPENDED" => HealthState::Suspended,
            "AVAIL" => HealthState::Avail,
            "INUSE" => HealthState::InUse,
            _ => HealthState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VdevType {
    Disk,
    Mirror,
    Raidz1,
    Raidz2,
    Raidz3,
    Spare,
    Log,
    Cache,
}

impl VdevType {
    /// Spare, log and cache groups hold devices that do not store pool data.
    pub fn is_auxiliary(&self) -> bool {
        matches!(self, VdevType::Spare | VdevType::Log | VdevType::Cache)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub read: u64,
    pub write: u64,
    pub checksum: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.read
            .saturating_add(self.write)
            .saturating_add(self.checksum)
    }
}

impl AddAssign for ErrorCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.read = self.read.saturating_add(rhs.read);
        self.write = self.write.saturating_add(rhs.write);
        self.checksum = self.checksum.saturating_add(rhs.checksum);
    }
}

/// One node of a pool's vdev tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Resolved `/dev` path; empty when the token could not be resolved.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    pub vdev_type: VdevType,
    #[serde(default)]
    pub vdev_parent: Option<String>,
    #[serde(default)]
    pub vdev_index: usize,
    pub state: HealthState,
    #[serde(default)]
    pub errors: ErrorCounts,
    #[serde(default)]
    pub is_spare: bool,
    #[serde(default)]
    pub is_log: bool,
    #[serde(default)]
    pub is_cache: bool,
    #[serde(default)]
    pub is_replacing: bool,
    #[serde(default)]
    pub children: Vec<Device>,
}

impl Device {
    pub fn new(name: impl Into<String>, vdev_type: VdevType) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            guid: None,
            serial: None,
            vdev_type,
            vdev_parent: None,
            vdev_index: 0,
            state: HealthState::Unknown,
            errors: ErrorCounts::default(),
            is_spare: false,
            is_log: false,
            is_cache: false,
            is_replacing: false,
            children: Vec::new(),
        }
    }

    pub fn is_disk(&self) -> bool {
        self.vdev_type == VdevType::Disk
    }

    /// The `replacing-N` placeholder row; its members are listed beside it.
    pub fn is_replacing_group(&self) -> bool {
        self.is_replacing && self.name.starts_with("replacing")
    }

    /// Error counts of this node plus every descendant.
    pub fn subtree_errors(&self) -> ErrorCounts {
        let mut total = self.errors;
        for child in &self.children {
            total += child.subtree_errors();
        }
        total
    }

    /// Disk leaves below (or at) this node, depth first.
    pub fn disks(&self) -> Vec<&Device> {
        let mut out = Vec::new();
        collect_disks(self, &mut out);
        out
    }
}

fn collect_disks<'a>(device: &'a Device, out: &mut Vec<&'a Device>) {
    if device.is_disk() {
        out.push(device);
    }
    for child in &device.children {
        collect_disks(child, out);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanFunction {
    #[default]
    None,
    Scrub,
    Resilver,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    None,
    Scanning,
    Finished,
    Canceled,
}

/// The running or most recent scrub/resilver of a pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    pub function: ScanFunction,
    pub state: ScanState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: u64,
    pub examined_bytes: u64,
    pub total_bytes: u64,
    pub errors: u64,
    pub repaired_bytes: u64,
    pub progress_pct: f64,
    pub rate_bytes_per_sec: u64,
    pub time_remaining_secs: u64,
}

/// A scrub recorded in `zpool history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrubRecord {
    pub timestamp: NaiveDateTime,
    pub command: String,
}

/// One storage pool on the reporting host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    #[serde(default)]
    pub guid: Option<String>,
    pub health: HealthState,
    pub size_bytes: u64,
    pub allocated_bytes: u64,
    pub free_bytes: u64,
    pub fragmentation_pct: u32,
    pub capacity_pct: u32,
    pub dedup_ratio: f64,
    #[serde(default)]
    pub altroot: Option<String>,
    /// Own counts plus the recursive sum over the vdev tree.
    #[serde(default)]
    pub errors: ErrorCounts,
    /// Counts printed on the pool's own row; only an input to `errors`.
    #[serde(skip)]
    pub reported_errors: ErrorCounts,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub errors_summary: Option<String>,
    #[serde(default)]
    pub data_errors: u64,
    #[serde(default)]
    pub scan: Option<ScanInfo>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub scrub_history: Vec<ScrubRecord>,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Recompute `errors` from the pool row and the device tree.
    pub fn aggregate_errors(&mut self) {
        let mut total = self.reported_errors;
        for device in &self.devices {
            total += device.subtree_errors();
        }
        self.errors = total;
    }

    /// Data disks only: spare, log and cache subtrees are skipped.
    pub fn device_count(&self) -> usize {
        self.devices.iter().map(count_data_disks).sum()
    }

    pub fn disks(&self) -> Vec<&Device> {
        self.devices.iter().flat_map(|d| d.disks()).collect()
    }
}

fn count_data_disks(device: &Device) -> usize {
    if device.vdev_type.is_auxiliary() {
        return 0;
    }
    if device.is_disk() {
        return usize::from(!device.is_replacing_group());
    }
    device.children.iter().map(count_data_disks).sum()
}

/// Everything one host reports for a single collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub hostname: String,
    pub collected_at: DateTime<Utc>,
    pub zfs_available: bool,
    pub pools: Vec<Pool>,
}

impl Report {
    pub fn unavailable(hostname: impl Into<String>, collected_at: DateTime<Utc>) -> Self {
        Self {
            hostname: hostname.into(),
            collected_at,
            zfs_available: false,
            pools: Vec::new(),
        }
    }
}
