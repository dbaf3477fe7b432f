//! `zpool status <pool>` output → state, scan, device tree and error summary.

use crate::scan::parse_scan_info;
use crate::tree::{parse_config_section, ConfigTable};
use vigil_core::model::{HealthState, Pool, ScanInfo};

/// Labels that open a section of the status text.
const SECTION_LABELS: &[&str] = &[
    "pool",
    "id",
    "state",
    "status",
    "action",
    "see",
    "scan",
    "scrub",
    "config",
    "errors",
    "remove",
    "checkpoint",
];

/// Everything `zpool status` says about one pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStatus {
    pub name: Option<String>,
    pub state: Option<HealthState>,
    pub status_message: Option<String>,
    pub action: Option<String>,
    pub scan: Option<ScanInfo>,
    pub config: ConfigTable,
    pub errors_summary: Option<String>,
    pub data_errors: u64,
}

impl PoolStatus {
    /// Fold the status details into a pool that came from `zpool list`.
    pub fn merge_into(self, pool: &mut Pool) {
        if let Some(state) = self.state.filter(|s| *s != HealthState::Unknown) {
            pool.health = state;
        }
        if let Some(row) = &self.config.pool_row {
            pool.reported_errors = row.errors;
        }
        pool.devices = self.config.devices;
        pool.scan = self.scan;
        pool.status_message = self.status_message;
        pool.action = self.action;
        pool.errors_summary = self.errors_summary;
        pool.data_errors = self.data_errors;
    }
}

#[derive(Debug)]
struct Section<'a> {
    label: &'a str,
    lines: Vec<&'a str>,
}

impl Section<'_> {
    /// Prose sections: every line trimmed and joined with single spaces.
    fn text(&self) -> Option<String> {
        let joined = self
            .lines
            .iter()
            .flat_map(|l| l.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    }
}

/// Parse the status text of `pool`.
pub fn parse_pool_status(output: &str, pool: &str) -> PoolStatus {
    let mut status = PoolStatus::default();

    for section in split_sections(output) {
        match section.label {
            "pool" => status.name = section.text(),
            "state" => status.state = section.text().map(|s| HealthState::from(s.as_str())),
            "status" => status.status_message = section.text(),
            "action" => status.action = section.text(),
            "scan" | "scrub" => {
                status.scan = section.text().map(|s| parse_scan_info(&s));
            }
            "config" => {
                let name = status.name.as_deref().unwrap_or(pool);
                status.config = parse_config_section(&section.lines, name);
            }
            "errors" => {
                status.errors_summary = section.lines.first().map(|l| l.trim().to_string());
                status.data_errors = count_data_errors(&section.lines);
            }
            _ => {}
        }
    }
    status
}

/// Group lines under the label that precedes them.
fn split_sections(output: &str) -> Vec<Section<'_>> {
    let mut sections: Vec<Section<'_>> = Vec::new();
    for line in output.lines() {
        if let Some((label, content)) = section_header(line) {
            sections.push(Section {
                label,
                lines: vec![content],
            });
        } else if let Some(current) = sections.last_mut() {
            current.lines.push(line);
        }
    }
    sections
}

fn section_header(line: &str) -> Option<(&str, &str)> {
    let (label, content) = line.trim_start().split_once(':')?;
    SECTION_LABELS
        .contains(&label)
        .then(|| (label, content.trim()))
}

/// `No known data errors` → 0, `3 data errors, use '-v' for a list` → 3,
/// `Permanent errors have been detected...` → number of listed objects.
fn count_data_errors(lines: &[&str]) -> u64 {
    let Some(summary) = lines.first().map(|l| l.trim().to_ascii_lowercase()) else {
        return 0;
    };
    if summary.starts_with("no known data errors") {
        return 0;
    }
    if let Some(count) = summary
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
    {
        return count;
    }
    if summary.contains("permanent errors") {
        return lines[1..].iter().filter(|l| !l.trim().is_empty()).count() as u64;
    }
    0
}
