//! Drive serial numbers for the disks backing each pool.
//!
//! The host's block devices are probed once per cycle to build a
//! [`DeviceSerialMap`]; the map is then applied read-only to every pool tree.

use crate::command::CommandRunner;
use crate::identity::{is_simple_name, parent_disk_name};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use vigil_core::error::{VigilError, VigilResult};
use vigil_core::model::Device;
use vigil_core::provider::ToolOutput;

/// Kernel devices that never back a pool.
pub const EXCLUDED_PREFIXES: &[&str] = &["loop", "ram", "dm-", "md", "zram", "sr"];

const SERIAL_MIN_LEN: usize = 4;
const SERIAL_MAX_LEN: usize = 40;

/// Device name and `/dev` path → serial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSerialMap {
    serials: HashMap<String, String>,
}

impl DeviceSerialMap {
    pub fn insert(&mut self, name: &str, path: &str, serial: &str) {
        self.serials.insert(name.to_string(), serial.to_string());
        self.serials.insert(path.to_string(), serial.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.serials.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }
}

/// Optional external tools used by the probe chain.
#[derive(Debug, Clone, Default)]
pub struct SerialTools {
    pub smartctl: Option<CommandRunner>,
    pub lsblk: Option<CommandRunner>,
    pub hdparm: Option<CommandRunner>,
    pub sysctl: Option<CommandRunner>,
}

type ProbeFn = fn(&SerialCorrelator, &str) -> VigilResult<Option<String>>;

/// Probe chain, first hit wins.
const PROBES: &[(&str, ProbeFn)] = &[
    ("smartctl", SerialCorrelator::probe_smartctl),
    ("by-id", SerialCorrelator::probe_by_id),
    ("lsblk", SerialCorrelator::probe_lsblk),
    ("hdparm", SerialCorrelator::probe_hdparm),
    ("sysfs", SerialCorrelator::probe_sysfs),
];

pub struct SerialCorrelator {
    dev_root: PathBuf,
    sys_root: PathBuf,
    tools: SerialTools,
}

impl SerialCorrelator {
    pub fn new(dev_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>, tools: SerialTools) -> Self {
        Self {
            dev_root: dev_root.into(),
            sys_root: sys_root.into(),
            tools,
        }
    }

    /// Candidate whole-disk devices, sorted by name.
    pub fn block_devices(&self) -> VigilResult<Vec<String>> {
        let mut names: Vec<String> = match fs::read_dir(self.sys_root.join("block")) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        };

        if names.is_empty() {
            // FreeBSD has no sysfs
            if let Some(out) = run_probe(self.tools.sysctl.as_ref(), &["-n", "kern.disks"])? {
                names = out.stdout.split_whitespace().map(str::to_string).collect();
            }
        }

        names.retain(|name| !is_excluded(name));
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Probe every block device once.
    pub fn build_map(&self) -> VigilResult<DeviceSerialMap> {
        let mut map = DeviceSerialMap::default();
        for name in self.block_devices()? {
            match self.probe(&name)? {
                Some(serial) => map.insert(&name, &self.node_path(&name), &serial),
                None => debug!("no serial found for {name}"),
            }
        }
        Ok(map)
    }

    /// Run the probe chain for one device.
    pub fn probe(&self, name: &str) -> VigilResult<Option<String>> {
        for (probe_name, probe) in PROBES {
            if let Some(serial) = probe(self, name)? {
                debug!("serial for {name} found via {probe_name}");
                return Ok(Some(serial));
            }
        }
        Ok(None)
    }

    /// Attach serials to every disk leaf of `devices`.
    pub fn apply(&self, map: &DeviceSerialMap, devices: &mut [Device]) -> VigilResult<()> {
        for device in devices.iter_mut() {
            if device.is_disk() && !device.is_replacing_group() && device.serial.is_none() {
                device.serial = self.lookup(map, device)?;
                if device.serial.is_none() {
                    debug!("no serial correlated for {}", device.name);
                }
            }
            self.apply(map, &mut device.children)?;
        }
        Ok(())
    }

    fn lookup(&self, map: &DeviceSerialMap, device: &Device) -> VigilResult<Option<String>> {
        let parent = parent_disk_name(&device.name);
        let hit = map
            .get(&device.name)
            .or_else(|| (!device.path.is_empty()).then(|| map.get(&device.path)).flatten())
            .or_else(|| parent.and_then(|p| map.get(p)));
        if let Some(serial) = hit {
            return Ok(Some(serial.to_string()));
        }
        if !is_simple_name(&device.name) {
            return Ok(None);
        }
        match self.probe(&device.name)? {
            Some(serial) => Ok(Some(serial)),
            None => match parent {
                Some(p) => self.probe(p),
                None => Ok(None),
            },
        }
    }

    fn node_path(&self, name: &str) -> String {
        self.dev_root.join(name).to_string_lossy().into_owned()
    }

    fn probe_smartctl(&self, name: &str) -> VigilResult<Option<String>> {
        let node = self.node_path(name);
        // smartctl sets status bits even when the identity section printed fine
        let out = run_probe_any_status(self.tools.smartctl.as_ref(), &["-i", &node])?;
        Ok(out.and_then(|o| serial_number_field(&o.stdout)))
    }

    fn probe_by_id(&self, name: &str) -> VigilResult<Option<String>> {
        let Ok(entries) = fs::read_dir(self.dev_root.join("disk/by-id")) else {
            return Ok(None);
        };
        let mut links: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok().map(|n| (n, e.path())))
            .filter(|(n, _)| !n.contains("-part"))
            .collect();
        links.sort();

        Ok(links
            .iter()
            .filter(|(_, path)| link_target_name(path).as_deref() == Some(name))
            .find_map(|(link, _)| serial_from_by_id(link)))
    }

    fn probe_lsblk(&self, name: &str) -> VigilResult<Option<String>> {
        let node = self.node_path(name);
        let out = run_probe(self.tools.lsblk.as_ref(), &["-dno", "SERIAL", &node])?;
        Ok(out.and_then(|o| {
            o.stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        }))
    }

    fn probe_hdparm(&self, name: &str) -> VigilResult<Option<String>> {
        let node = self.node_path(name);
        let out = run_probe(self.tools.hdparm.as_ref(), &["-I", &node])?;
        Ok(out.and_then(|o| serial_number_field(&o.stdout)))
    }

    fn probe_sysfs(&self, name: &str) -> VigilResult<Option<String>> {
        let mut candidates = vec![self.sys_root.join("block").join(name).join("device/serial")];
        if let Some(ctrl) = nvme_controller(name) {
            candidates.push(self.sys_root.join("class/nvme").join(ctrl).join("serial"));
        }
        Ok(candidates.iter().find_map(|path| read_trimmed(path)))
    }
}

/// Run a probe tool; a missing tool or a failed run is a miss, cancellation is not.
fn run_probe(runner: Option<&CommandRunner>, args: &[&str]) -> VigilResult<Option<ToolOutput>> {
    Ok(run_probe_any_status(runner, args)?.filter(ToolOutput::success))
}

fn run_probe_any_status(
    runner: Option<&CommandRunner>,
    args: &[&str],
) -> VigilResult<Option<ToolOutput>> {
    let Some(runner) = runner else {
        return Ok(None);
    };
    match runner.run(args) {
        Ok(out) => Ok(Some(out)),
        Err(VigilError::Cancelled) => Err(VigilError::Cancelled),
        Err(err) => {
            debug!("{} {}: {err}", runner.binary().display(), args.join(" "));
            Ok(None)
        }
    }
}

pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Value of a `Serial Number:` line as printed by smartctl and hdparm.
pub fn serial_number_field(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case("serial number") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Serial encoded in a `/dev/disk/by-id` link name.
///
/// `ata-<model>_<serial>`, `scsi-SATA_<model>_<serial>`,
/// `scsi-S<vendor>_<model>_<serial>` and `scsi-S<serial>` are understood.
pub fn serial_from_by_id(link: &str) -> Option<String> {
    if link.starts_with("wwn-") {
        return None;
    }
    let candidate = if let Some(rest) = link.strip_prefix("scsi-SATA_") {
        rest.rsplit('_').next()?
    } else if let Some(rest) = link.strip_prefix("scsi-S") {
        rest.rsplit('_').next()?
    } else {
        let (_, rest) = link.split_once('-')?;
        let (_, serial) = rest.rsplit_once('_')?;
        serial
    };
    is_plausible_serial(candidate).then(|| candidate.to_string())
}

fn is_plausible_serial(candidate: &str) -> bool {
    (SERIAL_MIN_LEN..=SERIAL_MAX_LEN).contains(&candidate.len())
        && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// `nvme0n1` → `nvme0`.
fn nvme_controller(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("nvme")?;
    let digits = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 || !rest[digits..].starts_with('n') {
        return None;
    }
    Some(&name[..4 + digits])
}

fn read_trimmed(path: &Path) -> Option<String> {
    let value = fs::read_to_string(path).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn link_target_name(link: &Path) -> Option<String> {
    fs::read_link(link)
        .ok()?
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}
