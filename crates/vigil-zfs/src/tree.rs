//! Builds the vdev tree from the `config:` table of `zpool status`.
//!
//! Rows are folded into the tree by value. The builder threads a stack of
//! `(depth, index path)` pairs instead of references into the tree, so any
//! nesting depth is handled without aliasing.

use crate::human::parse_count;
use vigil_core::model::{Device, ErrorCounts, HealthState, VdevType};

const TAB_WIDTH: usize = 8;
const INDENT_UNIT: usize = 2;

/// One tokenized line of the config table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRow {
    pub depth: usize,
    pub token: String,
    pub state: HealthState,
    pub errors: ErrorCounts,
    /// Path from a trailing `was /dev/...` annotation on missing devices.
    pub was_path: Option<String>,
}

/// How a device token is treated when building the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Vdev { vdev_type: VdevType, is_replacing: bool },
    /// `special` / `dedup` allocation-class headings: no node of their own.
    ClassHeading,
}

/// Prefix classification. Order matters: specific raidz levels are checked
/// before the generic `raidz` prefix.
pub fn classify(token: &str) -> RowKind {
    let lower = token.to_ascii_lowercase();
    let vdev = |vdev_type| RowKind::Vdev {
        vdev_type,
        is_replacing: false,
    };

    if lower.starts_with("mirror") {
        vdev(VdevType::Mirror)
    } else if lower.starts_with("raidz3") || lower.starts_with("draid3") {
        vdev(VdevType::Raidz3)
    } else if lower.starts_with("raidz2") || lower.starts_with("draid2") {
        vdev(VdevType::Raidz2)
    } else if lower.starts_with("raidz1")
        || lower.starts_with("raidz")
        || lower.starts_with("draid")
    {
        vdev(VdevType::Raidz1)
    } else if lower == "spares" || lower.starts_with("spare") {
        vdev(VdevType::Spare)
    } else if lower == "logs" || lower.starts_with("log") {
        vdev(VdevType::Log)
    } else if lower == "cache" {
        vdev(VdevType::Cache)
    } else if lower == "special" || lower == "dedup" {
        RowKind::ClassHeading
    } else if lower.starts_with("replacing") {
        RowKind::Vdev {
            vdev_type: VdevType::Disk,
            is_replacing: true,
        }
    } else {
        vdev(VdevType::Disk)
    }
}

/// Column width of the leading whitespace, tabs expanded.
pub fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
            _ => break,
        }
    }
    width
}

/// Tokenize one table line; `base_indent` is the indentation of the `NAME` header.
pub fn parse_config_row(line: &str, base_indent: usize) -> Option<ConfigRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let token = fields.first()?;

    let depth = indent_width(line).saturating_sub(base_indent) / INDENT_UNIT;
    let state = fields
        .get(1)
        .map(|s| HealthState::from(*s))
        .unwrap_or_default();
    let errors = if fields.len() >= 5 {
        ErrorCounts {
            read: parse_count(fields[2]),
            write: parse_count(fields[3]),
            checksum: parse_count(fields[4]),
        }
    } else {
        ErrorCounts::default()
    };
    let was_path = fields
        .windows(2)
        .find(|pair| pair[0] == "was")
        .map(|pair| pair[1].to_string());

    Some(ConfigRow {
        depth,
        token: token.to_string(),
        state,
        errors,
        was_path,
    })
}

/// The device table of one pool: its own row plus the vdev tree below it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTable {
    pub pool_row: Option<ConfigRow>,
    pub devices: Vec<Device>,
}

/// Parse the raw `config:` section lines for `pool`.
///
/// The `NAME STATE READ WRITE CKSUM` header and the pool's own row are
/// consumed here; everything after them is folded into the tree.
pub fn parse_config_section(lines: &[&str], pool: &str) -> ConfigTable {
    let content: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| !l.trim().is_empty())
        .collect();

    let header_idx = content
        .iter()
        .position(|l| l.split_whitespace().next() == Some("NAME"));
    let base_indent = match header_idx {
        Some(idx) => indent_width(content[idx]),
        None => content.first().map(|l| indent_width(l)).unwrap_or(0),
    };
    let body = match header_idx {
        Some(idx) => &content[idx + 1..],
        None => &content[..],
    };

    let mut rows = body
        .iter()
        .filter_map(|line| parse_config_row(line, base_indent))
        .peekable();

    let pool_row = rows.next_if(|row| row.depth == 0 && row.token == pool);
    ConfigTable {
        pool_row,
        devices: build_device_tree(rows),
    }
}

/// Fold rows (pool row already removed) into top-level devices.
pub fn build_device_tree<I>(rows: I) -> Vec<Device>
where
    I: IntoIterator<Item = ConfigRow>,
{
    rows.into_iter()
        .fold(TreeBuilder::default(), TreeBuilder::push)
        .finish()
}

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    depth: usize,
    path: Vec<usize>,
}

#[derive(Debug, Default)]
struct TreeBuilder {
    roots: Vec<Device>,
    /// Open containers and disks, innermost last.
    stack: Vec<Frame>,
}

impl TreeBuilder {
    fn push(mut self, row: ConfigRow) -> Self {
        while self.stack.last().is_some_and(|f| f.depth >= row.depth) {
            self.stack.pop();
        }

        let (vdev_type, replacing_group) = match classify(&row.token) {
            RowKind::ClassHeading => {
                // members of an allocation class are ordinary top-level vdevs
                self.stack.clear();
                return self;
            }
            RowKind::Vdev {
                vdev_type,
                is_replacing,
            } => (vdev_type, is_replacing),
        };

        // Disks are leaves: rows nested under one (members of a replacing
        // group) attach to the nearest container instead.
        let parent_idx = self
            .stack
            .iter()
            .rposition(|f| !self.node(&f.path).is_disk());
        let skipped = parent_idx.map_or(0, |idx| idx + 1);
        let nested_under_disk = self.stack[skipped..]
            .iter()
            .any(|f| self.node(&f.path).is_replacing);

        let mut device = Device::new(row.token.as_str(), vdev_type);
        device.state = row.state;
        device.errors = row.errors;
        device.is_replacing = replacing_group || nested_under_disk;
        device.is_spare = vdev_type == VdevType::Spare;
        device.is_log = vdev_type == VdevType::Log;
        device.is_cache = vdev_type == VdevType::Cache;
        if let Some(was) = row.was_path {
            if row.token.chars().all(|c| c.is_ascii_digit()) {
                device.guid = Some(row.token.clone());
            }
            device.path = was;
        }

        let path = match parent_idx.map(|idx| self.stack[idx].path.clone()) {
            Some(parent_path) => {
                let parent = self.node_mut(&parent_path);
                device.vdev_parent = Some(parent.name.clone());
                device.vdev_index = parent.children.len();
                device.is_spare |= parent.is_spare;
                device.is_log |= parent.is_log;
                device.is_cache |= parent.is_cache;
                parent.children.push(device);
                let mut path = parent_path;
                path.push(parent.children.len() - 1);
                path
            }
            None => {
                device.vdev_index = self.roots.len();
                self.roots.push(device);
                vec![self.roots.len() - 1]
            }
        };

        self.stack.push(Frame {
            depth: row.depth,
            path,
        });
        self
    }

    fn node(&self, path: &[usize]) -> &Device {
        let mut node = &self.roots[path[0]];
        for &idx in &path[1..] {
            node = &node.children[idx];
        }
        node
    }

    fn node_mut(&mut self, path: &[usize]) -> &mut Device {
        let mut node = &mut self.roots[path[0]];
        for &idx in &path[1..] {
            node = &mut node.children[idx];
        }
        node
    }

    fn finish(self) -> Vec<Device> {
        self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(depth: usize, token: &str) -> ConfigRow {
        ConfigRow {
            depth,
            token: token.to_string(),
            state: HealthState::Online,
            errors: ErrorCounts::default(),
            was_path: None,
        }
    }

    fn vdev_type(token: &str) -> VdevType {
        match classify(token) {
            RowKind::Vdev { vdev_type, .. } => vdev_type,
            RowKind::ClassHeading => panic!("{token} is a class heading"),
        }
    }

    #[test]
    fn classification_is_prefix_order_sensitive() {
        assert_eq!(vdev_type("raidz2-0"), VdevType::Raidz2);
        assert_eq!(vdev_type("raidz3-1"), VdevType::Raidz3);
        assert_eq!(vdev_type("raidz1-0"), VdevType::Raidz1);
        assert_eq!(vdev_type("raidz-0"), VdevType::Raidz1);
        assert_eq!(vdev_type("draid2:4d:1s:6c-0"), VdevType::Raidz2);
        assert_eq!(vdev_type("mirror-3"), VdevType::Mirror);
        assert_eq!(vdev_type("spares"), VdevType::Spare);
        assert_eq!(vdev_type("spare-1"), VdevType::Spare);
        assert_eq!(vdev_type("logs"), VdevType::Log);
        assert_eq!(vdev_type("cache"), VdevType::Cache);
        assert_eq!(vdev_type("sda"), VdevType::Disk);
        assert_eq!(vdev_type("/dev/disk/by-id/ata-X_Y"), VdevType::Disk);
        assert_eq!(
            classify("replacing-0"),
            RowKind::Vdev {
                vdev_type: VdevType::Disk,
                is_replacing: true
            }
        );
        assert_eq!(classify("special"), RowKind::ClassHeading);
    }

    #[test]
    fn indent_expands_tabs() {
        assert_eq!(indent_width("\tNAME"), 8);
        assert_eq!(indent_width("\t  mirror-0"), 10);
        assert_eq!(indent_width("    sda"), 4);
        assert_eq!(indent_width("  \tx"), 8);
    }

    #[test]
    fn row_parses_counts_and_annotations() {
        let r = parse_config_row("\t    sda     ONLINE       1     0  1.2K", 8).unwrap();
        assert_eq!(r.depth, 2);
        assert_eq!(r.token, "sda");
        assert_eq!(r.errors.read, 1);
        assert_eq!(r.errors.checksum, 1229);

        let spare = parse_config_row("\t  sde       AVAIL", 8).unwrap();
        assert_eq!(spare.state, HealthState::Avail);
        assert_eq!(spare.errors, ErrorCounts::default());

        let missing = parse_config_row(
            "\t    1234567890123456789  UNAVAIL  0  0  0  was /dev/sdc1",
            8,
        )
        .unwrap();
        assert_eq!(missing.was_path.as_deref(), Some("/dev/sdc1"));
        assert!(parse_config_row("   ", 0).is_none());
    }

    #[test]
    fn mirror_with_two_disks() {
        let tree = build_device_tree(vec![row(1, "mirror-0"), row(2, "sda"), row(2, "sdb")]);
        assert_eq!(tree.len(), 1);
        let mirror = &tree[0];
        assert_eq!(mirror.vdev_type, VdevType::Mirror);
        assert_eq!(mirror.children.len(), 2);
        for (idx, child) in mirror.children.iter().enumerate() {
            assert_eq!(child.vdev_type, VdevType::Disk);
            assert_eq!(child.vdev_parent.as_deref(), Some("mirror-0"));
            assert_eq!(child.vdev_index, idx);
            assert!(child.children.is_empty());
        }
    }

    #[test]
    fn full_status_table_with_aux_classes() {
        let lines = [
            "\tNAME        STATE     READ WRITE CKSUM",
            "\ttank        ONLINE       0     0     0",
            "\t  raidz2-0  ONLINE       0     0     0",
            "\t    sda     ONLINE       0     0     0",
            "\t    sdb     ONLINE       0     0     0",
            "\t    sdc     ONLINE       0     0     0",
            "\t    sdd     ONLINE       0     0     0",
            "\t  sdx       ONLINE       0     0     0",
            "\tspecial",
            "\t  mirror-1  ONLINE       0     0     0",
            "\t    nvme2n1 ONLINE       0     0     0",
            "\t    nvme3n1 ONLINE       0     0     0",
            "\tlogs",
            "\t  nvme0n1   ONLINE       0     0     0",
            "\tcache",
            "\t  nvme1n1   ONLINE       0     0     0",
            "",
            "\tspares",
            "\t  sde       AVAIL",
        ];
        let table = parse_config_section(&lines, "tank");
        assert_eq!(table.pool_row.as_ref().map(|r| r.token.as_str()), Some("tank"));

        let names: Vec<&str> = table.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["raidz2-0", "sdx", "mirror-1", "logs", "cache", "spares"]);

        let raidz = &table.devices[0];
        assert_eq!(raidz.vdev_type, VdevType::Raidz2);
        assert_eq!(raidz.children.len(), 4);
        assert_eq!(table.devices[1].vdev_type, VdevType::Disk);
        assert_eq!(table.devices[1].vdev_index, 1);
        assert_eq!(table.devices[2].children.len(), 2);

        let logs = &table.devices[3];
        assert!(logs.is_log);
        assert_eq!(logs.children[0].name, "nvme0n1");
        assert!(logs.children[0].is_log);
        assert_eq!(logs.children[0].vdev_parent.as_deref(), Some("logs"));

        assert!(table.devices[4].children[0].is_cache);

        let spare = &table.devices[5].children[0];
        assert!(spare.is_spare);
        assert_eq!(spare.state, HealthState::Avail);
    }

    #[test]
    fn replacing_members_attach_to_container() {
        let rows = vec![
            row(1, "raidz1-0"),
            row(2, "sda"),
            row(2, "replacing-1"),
            row(3, "sdb"),
            row(3, "sdf"),
            row(2, "sdc"),
        ];
        let tree = build_device_tree(rows);
        assert_eq!(tree.len(), 1);
        let raidz = &tree[0];
        let names: Vec<&str> = raidz.children.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["sda", "replacing-1", "sdb", "sdf", "sdc"]);
        assert!(raidz.children.iter().all(|d| d.children.is_empty()));
        assert!(raidz.children[1].is_replacing);
        assert!(raidz.children[2].is_replacing);
        assert!(raidz.children[3].is_replacing);
        assert!(!raidz.children[4].is_replacing);
    }

    #[test]
    fn nested_containers_are_supported() {
        let rows = vec![
            row(1, "mirror-0"),
            row(2, "sda"),
            row(2, "spare-1"),
            row(3, "sdb"),
            row(3, "sdz"),
            row(1, "mirror-1"),
            row(2, "sdc"),
        ];
        let tree = build_device_tree(rows);
        assert_eq!(tree.len(), 2);
        let spare = &tree[0].children[1];
        assert_eq!(spare.vdev_type, VdevType::Spare);
        assert_eq!(spare.vdev_parent.as_deref(), Some("mirror-0"));
        assert_eq!(spare.children.len(), 2);
        assert!(spare.children.iter().all(|d| d.is_spare));
        assert_eq!(tree[1].children[0].name, "sdc");
    }

    #[test]
    fn missing_device_keeps_guid_and_was_path() {
        let lines = [
            "\tNAME                     STATE     READ WRITE CKSUM",
            "\ttank                     DEGRADED     0     0     0",
            "\t  mirror-0               DEGRADED     0     0     0",
            "\t    sda                  ONLINE       0     0     0",
            "\t    9876543210123456789  UNAVAIL      0     0     0  was /dev/sdb1",
        ];
        let table = parse_config_section(&lines, "tank");
        let missing = &table.devices[0].children[1];
        assert_eq!(missing.guid.as_deref(), Some("9876543210123456789"));
        assert_eq!(missing.path, "/dev/sdb1");
        assert_eq!(missing.state, HealthState::Unavail);
    }
}
