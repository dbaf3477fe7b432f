//! Scrub records from `zpool history <pool>`.

use crate::human::parse_timestamp;
use vigil_core::model::ScrubRecord;

/// Every `zpool scrub` that started a scrub, oldest first.
///
/// Lines look like `2021-07-25.00:24:01 zpool scrub tank`; stop (`-s`) and
/// pause (`-p`) invocations are not scrubs and are skipped.
pub fn parse_scrub_history(output: &str) -> Vec<ScrubRecord> {
    output.lines().filter_map(parse_history_line).collect()
}

fn parse_history_line(line: &str) -> Option<ScrubRecord> {
    let (stamp, command) = line.trim().split_once(char::is_whitespace)?;
    let command = command.trim();
    let mut words = command.split_whitespace();
    if words.next() != Some("zpool") || words.next() != Some("scrub") {
        return None;
    }
    if words.any(|w| w == "-s" || w == "-p") {
        return None;
    }
    Some(ScrubRecord {
        timestamp: parse_timestamp(stamp)?,
        command: command.to_string(),
    })
}
