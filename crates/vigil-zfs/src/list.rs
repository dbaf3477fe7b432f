//! `zpool list -Hp` output → flat pool summaries.

use crate::human::{parse_percent, parse_ratio, parse_size};
use vigil_core::model::{HealthState, Pool};

/// Column selection passed to `zpool list -o`; the parser relies on this order.
pub const LIST_COLUMNS: &str = "name,size,alloc,free,frag,cap,dedup,health,altroot,guid";

const MIN_COLUMNS: usize = 8;

/// Parse every non-blank line into a `Pool` carrying only list-level fields.
pub fn parse_pool_list(output: &str) -> Vec<Pool> {
    output.lines().filter_map(parse_list_line).collect()
}

fn parse_list_line(line: &str) -> Option<Pool> {
    if line.trim().is_empty() {
        return None;
    }
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < MIN_COLUMNS || fields[0].is_empty() {
        return None;
    }

    let mut pool = Pool::new(fields[0]);
    pool.size_bytes = parse_size(fields[1]);
    pool.allocated_bytes = parse_size(fields[2]);
    pool.free_bytes = parse_size(fields[3]);
    pool.fragmentation_pct = parse_percent(fields[4]).round() as u32;
    pool.capacity_pct = parse_percent(fields[5]).round() as u32;
    pool.dedup_ratio = parse_ratio(fields[6]);
    pool.health = HealthState::from(fields[7]);
    pool.altroot = fields.get(8).and_then(|v| optional(v));
    pool.guid = fields.get(9).and_then(|v| optional(v));
    Some(pool)
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "-" {
        None
    } else {
        Some(value.to_string())
    }
}

/// `zpool list` exits non-zero with this diagnostic on hosts without pools.
pub fn is_no_pools_message(diagnostic: &str) -> bool {
    diagnostic.to_ascii_lowercase().contains("no pools available")
}
