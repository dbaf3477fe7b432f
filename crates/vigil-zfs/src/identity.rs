//! Maps the device tokens printed by `zpool status` (short names, `/dev`
//! paths, partition UUIDs, BSD gptids) to a canonical kernel device name.
//!
//! Resolution is an ordered table of named strategies; the first one that
//! recognizes a token wins. A token nothing recognizes is kept as-is.

use crate::command::CommandRunner;
use log::debug;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use vigil_core::model::Device;

/// Result of resolving one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    /// Empty when the token could not be tied to a device node.
    pub path: String,
    pub guid: Option<String>,
}

impl Identity {
    fn unresolved(token: &str) -> Self {
        Self {
            name: token.to_string(),
            path: String::new(),
            guid: None,
        }
    }
}

type ResolveFn = fn(&IdentityResolver, &str) -> Option<Identity>;

/// A single named resolution step.
pub struct Strategy {
    pub name: &'static str,
    resolve: ResolveFn,
}

/// Evaluated top to bottom.
pub const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "simple-name",
        resolve: IdentityResolver::simple_name,
    },
    Strategy {
        name: "dev-path",
        resolve: IdentityResolver::dev_path,
    },
    Strategy {
        name: "partuuid",
        resolve: IdentityResolver::partuuid,
    },
    Strategy {
        name: "by-id",
        resolve: IdentityResolver::by_id,
    },
    Strategy {
        name: "gptid-guid",
        resolve: IdentityResolver::gptid_guid,
    },
    Strategy {
        name: "disk-symlink",
        resolve: IdentityResolver::disk_symlink,
    },
    Strategy {
        name: "gptid-ref",
        resolve: IdentityResolver::gptid_ref,
    },
];

/// Short kernel device names such as `sda`, `nvme0n1p2`, `ada0`, `xvdb1`.
pub fn is_simple_name(token: &str) -> bool {
    static SIMPLE: OnceLock<Option<Regex>> = OnceLock::new();
    SIMPLE
        .get_or_init(|| Regex::new(r"^(sd|hd|nvme|da|ada|nvd|vd|xvd)[a-z0-9]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(token))
}

/// At least 32 characters, contains a dash and carries 32+ hex digits.
pub fn is_guid_like(token: &str) -> bool {
    token.len() >= 32
        && token.contains('-')
        && token.chars().filter(|c| c.is_ascii_hexdigit()).count() >= 32
}

/// GUID-like and not a path; paths go through the symlink strategies.
fn is_bare_guid(token: &str) -> bool {
    is_guid_like(token) && !token.contains('/')
}

/// Parent disk of a partition name: `sda1` → `sda`, `nvme0n1p2` → `nvme0n1`,
/// `ada0p2` → `ada0`. `None` for names that are not partitions.
pub fn parent_disk_name(name: &str) -> Option<&str> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"^(nvme\d+n\d+)p\d+$",
            r"^((?:sd|hd|vd|xvd)[a-z]+)\d+$",
            r"^([a-z]+\d+)p\d+$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });
    patterns
        .iter()
        .find_map(|re| re.captures(name))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `ada0p2` → `ada0`; anything that is not a partition comes back unchanged.
pub fn strip_partition_suffix(name: &str) -> &str {
    parent_disk_name(name).unwrap_or(name)
}

pub struct IdentityResolver {
    dev_root: PathBuf,
    glabel: Option<CommandRunner>,
}

impl IdentityResolver {
    pub fn new(dev_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            glabel: None,
        }
    }

    /// Enable the `glabel status` fallback for gptid lookups.
    pub fn with_glabel(mut self, runner: Option<CommandRunner>) -> Self {
        self.glabel = runner;
        self
    }

    /// Resolve `token`; never fails.
    pub fn resolve(&self, token: &str) -> Identity {
        for strategy in STRATEGIES {
            if let Some(identity) = (strategy.resolve)(self, token) {
                debug!("{token} resolved to {} via {}", identity.name, strategy.name);
                return identity;
            }
        }
        debug!("no identity strategy matched {token}");
        Identity::unresolved(token)
    }

    /// Run one strategy by name; `None` if it does not exist or did not match.
    pub fn resolve_with(&self, strategy: &str, token: &str) -> Option<Identity> {
        STRATEGIES
            .iter()
            .find(|s| s.name == strategy)
            .and_then(|s| (s.resolve)(self, token))
    }

    /// Resolve every node of a vdev tree in place.
    ///
    /// Missing devices carry their numeric GUID as the name and the last known
    /// path from the `was` annotation; that path is what gets resolved.
    pub fn resolve_tree(&self, devices: &mut [Device]) {
        for device in devices.iter_mut() {
            if device.is_disk() && !device.is_replacing_group() {
                self.resolve_device(device);
            }
            self.resolve_tree(&mut device.children);
        }
    }

    fn resolve_device(&self, device: &mut Device) {
        let token = if device.guid.is_some() && !device.path.is_empty() {
            device.path.clone()
        } else {
            device.name.clone()
        };
        let identity = self.resolve(&token);
        if identity.path.is_empty() {
            return;
        }
        if device.guid.is_none() {
            device.name = identity.name;
        }
        device.path = identity.path;
        if identity.guid.is_some() {
            device.guid = identity.guid;
        }
    }

    fn node_path(&self, name: &str) -> String {
        self.dev_root.join(name).to_string_lossy().into_owned()
    }

    /// Part of `token` below the device root, accepting both the literal
    /// `/dev` prefix and the configured root.
    fn relative_to_dev<'a>(&self, token: &'a str) -> Option<&'a Path> {
        let path = Path::new(token);
        path.strip_prefix(&self.dev_root)
            .or_else(|_| path.strip_prefix("/dev"))
            .ok()
    }

    fn simple_name(&self, token: &str) -> Option<Identity> {
        is_simple_name(token).then(|| Identity {
            name: token.to_string(),
            path: self.node_path(token),
            guid: None,
        })
    }

    fn dev_path(&self, token: &str) -> Option<Identity> {
        let rel = self.relative_to_dev(token)?;
        if rel.starts_with("disk") {
            return None;
        }
        let name = rel.file_name()?.to_str()?;
        is_simple_name(name).then(|| Identity {
            name: name.to_string(),
            path: token.to_string(),
            guid: None,
        })
    }

    fn partuuid(&self, token: &str) -> Option<Identity> {
        if !is_bare_guid(token) {
            return None;
        }
        let link = find_entry(&self.dev_root.join("disk/by-partuuid"), |entry| {
            entry.eq_ignore_ascii_case(token)
        })?;
        self.identity_from_link(&link, Some(token))
    }

    fn by_id(&self, token: &str) -> Option<Identity> {
        if !is_bare_guid(token) {
            return None;
        }
        let needle = token.to_ascii_lowercase();
        let link = find_entry(&self.dev_root.join("disk/by-id"), |entry| {
            entry.to_ascii_lowercase().contains(&needle)
        })?;
        self.identity_from_link(&link, Some(token))
    }

    fn gptid_guid(&self, token: &str) -> Option<Identity> {
        if !is_bare_guid(token) {
            return None;
        }
        let name = self.gptid_lookup(token)?;
        Some(Identity {
            path: self.node_path(&name),
            name,
            guid: Some(token.to_string()),
        })
    }

    fn disk_symlink(&self, token: &str) -> Option<Identity> {
        let rel = self.relative_to_dev(token)?;
        if !rel.starts_with("disk") {
            return None;
        }
        self.identity_from_link(&self.dev_root.join(rel), None)
    }

    fn gptid_ref(&self, token: &str) -> Option<Identity> {
        let uuid = match self.relative_to_dev(token) {
            Some(rel) => rel.strip_prefix("gptid").ok()?.to_str()?,
            None => token.strip_prefix("gptid/")?,
        };
        if uuid.is_empty() {
            return None;
        }
        let name = self.gptid_lookup(uuid)?;
        Some(Identity {
            path: self.node_path(&name),
            name,
            guid: None,
        })
    }

    fn identity_from_link(&self, link: &Path, guid: Option<&str>) -> Option<Identity> {
        let name = link_target_name(link)?;
        Some(Identity {
            path: self.node_path(&name),
            name,
            guid: guid.map(str::to_string),
        })
    }

    /// `<dev>/gptid/<uuid>` symlink first, then `glabel status`.
    fn gptid_lookup(&self, uuid: &str) -> Option<String> {
        let link = self.dev_root.join("gptid").join(uuid);
        if let Some(target) = link_target_name(&link) {
            return Some(strip_partition_suffix(&target).to_string());
        }
        self.glabel_lookup(uuid)
    }

    fn glabel_lookup(&self, uuid: &str) -> Option<String> {
        let runner = self.glabel.as_ref()?;
        let out = match runner.run(&["status"]) {
            Ok(out) if out.success() => out,
            Ok(out) => {
                debug!("glabel status exited with {}: {}", out.status, out.diagnostic());
                return None;
            }
            Err(err) => {
                debug!("glabel status failed: {err}");
                return None;
            }
        };
        parse_glabel_component(&out.stdout, uuid).map(|c| strip_partition_suffix(c).to_string())
    }
}

/// Component column of the `glabel status` row whose label mentions `uuid`.
pub fn parse_glabel_component<'a>(output: &'a str, uuid: &str) -> Option<&'a str> {
    let needle = uuid.to_ascii_lowercase();
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || !fields[0].to_ascii_lowercase().contains(&needle) {
            return None;
        }
        fields.last().copied()
    })
}

fn find_entry(dir: &Path, matches: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_str().is_some_and(&matches))
        .map(|e| e.path())
        .collect();
    found.sort();
    found.into_iter().next()
}

/// Final component of where `link` points.
fn link_target_name(link: &Path) -> Option<String> {
    let target = fs::read_link(link).ok()?;
    target
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::model::VdevType;

    const PARTUUID: &str = "6f1c2a9e-3b4d-4e5f-8a7b-0c1d2e3f4a5b";

    #[test]
    fn simple_name_heuristic() {
        for name in ["sda", "sdb1", "nvme0n1", "nvme0n1p2", "ada0", "da3", "vdb", "xvdf1"] {
            assert!(is_simple_name(name), "{name}");
        }
        for name in ["loop0", "mirror-0", "sda-part1", "/dev/sda", "SDA", ""] {
            assert!(!is_simple_name(name), "{name}");
        }
    }

    #[test]
    fn guid_heuristic() {
        assert!(is_guid_like(PARTUUID));
        assert!(is_guid_like("6F1C2A9E-3B4D-4E5F-8A7B-0C1D2E3F4A5B"));
        // no dash
        assert!(!is_guid_like("6f1c2a9e3b4d4e5f8a7b0c1d2e3f4a5b"));
        // too short
        assert!(!is_guid_like("6f1c2a9e-3b4d-4e5f"));
        // long but not hex
        assert!(!is_guid_like("ata-WDC_WD40EFRX-68N32N0_WD-WCC7K1234567"));
        assert!(!is_guid_like("12345678901234567890"));
    }

    #[test]
    fn partition_suffixes() {
        assert_eq!(parent_disk_name("sda1"), Some("sda"));
        assert_eq!(parent_disk_name("xvdb12"), Some("xvdb"));
        assert_eq!(parent_disk_name("nvme0n1p2"), Some("nvme0n1"));
        assert_eq!(parent_disk_name("ada0p2"), Some("ada0"));
        assert_eq!(parent_disk_name("sda"), None);
        assert_eq!(parent_disk_name("nvme0n1"), None);
        assert_eq!(strip_partition_suffix("ada0"), "ada0");
    }

    #[test]
    fn glabel_output_component() {
        let out = "                                      Name  Status  Components\n\
                   gptid/6f1c2a9e-3b4d-4e5f-8a7b-0c1d2e3f4a5b     N/A  ada1p2\n\
                   gptid/00000000-0000-0000-0000-000000000000     N/A  ada0p1\n";
        assert_eq!(parse_glabel_component(out, &PARTUUID.to_uppercase()), Some("ada1p2"));
        assert_eq!(parse_glabel_component(out, "ffffffff"), None);
    }

    #[test]
    fn unmatched_token_is_kept() {
        let resolver = IdentityResolver::new("/nonexistent-dev-root");
        let identity = resolver.resolve("mystery-device");
        assert_eq!(identity, Identity::unresolved("mystery-device"));
        assert!(resolver.resolve_with("no-such-strategy", "sda").is_none());
    }

    #[cfg(unix)]
    mod filesystem {
        use super::*;
        use std::os::unix::fs::symlink;
        use tempfile::{tempdir, TempDir};

        fn dev_tree() -> TempDir {
            let tmp = tempdir().unwrap();
            let dev = tmp.path();
            for dir in ["disk/by-partuuid", "disk/by-id", "gptid"] {
                fs::create_dir_all(dev.join(dir)).unwrap();
            }
            symlink("../../sdc1", dev.join("disk/by-partuuid").join(PARTUUID)).unwrap();
            symlink(
                "../../sdd",
                dev.join("disk/by-id/wwn-0x5000c500a1b2c3d4-9d2e1f30-4a5b-4c6d-8e7f-a0b1c2d3e4f5"),
            )
            .unwrap();
            symlink("../../sde", dev.join("disk/by-id/ata-ST4000VN008_ZDH1ABCD")).unwrap();
            symlink(
                "../ada2p2",
                dev.join("gptid/11111111-2222-3333-4444-555555555555"),
            )
            .unwrap();
            tmp
        }

        fn node(tmp: &TempDir, name: &str) -> String {
            tmp.path().join(name).to_string_lossy().into_owned()
        }

        #[test]
        fn simple_and_dev_path_strategies() {
            let tmp = dev_tree();
            let resolver = IdentityResolver::new(tmp.path());

            let identity = resolver.resolve("sda");
            assert_eq!(identity.name, "sda");
            assert_eq!(identity.path, node(&tmp, "sda"));

            let identity = resolver.resolve("/dev/nvme0n1p3");
            assert_eq!(identity.name, "nvme0n1p3");
            assert_eq!(identity.path, "/dev/nvme0n1p3");
            assert!(resolver.resolve_with("dev-path", "/dev/disk/by-id/foo").is_none());
        }

        #[test]
        fn partuuid_match_is_case_insensitive() {
            let tmp = dev_tree();
            let resolver = IdentityResolver::new(tmp.path());
            let identity = resolver.resolve(&PARTUUID.to_uppercase());
            assert_eq!(identity.name, "sdc1");
            assert_eq!(identity.path, node(&tmp, "sdc1"));
            assert_eq!(identity.guid.as_deref(), Some(PARTUUID.to_uppercase().as_str()));
        }

        #[test]
        fn by_id_substring_match() {
            let tmp = dev_tree();
            let resolver = IdentityResolver::new(tmp.path());
            let identity = resolver
                .resolve_with("by-id", "9d2e1f30-4a5b-4c6d-8e7f-a0b1c2d3e4f5")
                .unwrap();
            assert_eq!(identity.name, "sdd");
            // partuuid has no such entry, so the full chain lands on by-id too
            assert_eq!(resolver.resolve("9d2e1f30-4a5b-4c6d-8e7f-a0b1c2d3e4f5").name, "sdd");
        }

        #[test]
        fn disk_symlink_and_gptid() {
            let tmp = dev_tree();
            let resolver = IdentityResolver::new(tmp.path());

            let identity = resolver.resolve("/dev/disk/by-id/ata-ST4000VN008_ZDH1ABCD");
            assert_eq!(identity.name, "sde");
            assert_eq!(identity.path, node(&tmp, "sde"));

            let identity = resolver.resolve("gptid/11111111-2222-3333-4444-555555555555");
            assert_eq!(identity.name, "ada2");

            let identity = resolver.resolve("11111111-2222-3333-4444-555555555555");
            assert_eq!(identity.name, "ada2");
            assert_eq!(
                identity.guid.as_deref(),
                Some("11111111-2222-3333-4444-555555555555")
            );
        }

        #[test]
        fn tree_resolution_keeps_missing_device_guid() {
            let tmp = dev_tree();
            let resolver = IdentityResolver::new(tmp.path());

            let mut missing = Device::new("9876543210123456789", VdevType::Disk);
            missing.guid = Some("9876543210123456789".into());
            missing.path = "/dev/sdq1".into();
            let mut mirror = Device::new("mirror-0", VdevType::Mirror);
            mirror.children = vec![Device::new(PARTUUID, VdevType::Disk), missing];
            let mut devices = vec![mirror];

            resolver.resolve_tree(&mut devices);
            let children = &devices[0].children;
            assert_eq!(children[0].name, "sdc1");
            assert_eq!(children[0].guid.as_deref(), Some(PARTUUID));
            assert_eq!(children[1].name, "9876543210123456789");
            assert_eq!(children[1].path, "/dev/sdq1");
            assert_eq!(children[1].guid.as_deref(), Some("9876543210123456789"));
            assert!(devices[0].path.is_empty());
        }
    }
}
