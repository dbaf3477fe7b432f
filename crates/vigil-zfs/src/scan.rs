//! Scrub/resilver extraction from the `scan:` prose of `zpool status`.
//!
//! The text differs between every OpenZFS release, so this is a set of
//! independent keyword-anchored extractors rather than a grammar. Each one is
//! total: a missing or garbled fragment yields zero and never affects the
//! others.

use crate::human::{
    local_to_utc, parse_count, parse_duration_text, parse_hms, parse_percent,
    parse_size, parse_timestamp_prefix,
};
use chrono::{DateTime, TimeDelta, Utc};
use vigil_core::model::{ScanFunction, ScanInfo, ScanState};

/// Parse the logical scan text (continuation lines already joined).
pub fn parse_scan_info(text: &str) -> ScanInfo {
    let original = text.split_whitespace().collect::<Vec<_>>().join(" ");
    // ASCII lowercasing keeps byte offsets valid for slicing `original`.
    let lower = original.to_ascii_lowercase();
    let mut info = ScanInfo::default();

    if lower.is_empty() || lower.contains("no scans") || lower.contains("none requested") {
        return info;
    }

    info.function = if lower.contains("resilver") {
        ScanFunction::Resilver
    } else if lower.contains("scrub") {
        ScanFunction::Scrub
    } else {
        ScanFunction::None
    };

    info.state = if lower.contains("in progress") {
        ScanState::Scanning
    } else if lower.contains("canceled") || lower.contains("cancelled") {
        ScanState::Canceled
    } else if lower.contains("repaired") || lower.contains("resilvered") {
        ScanState::Finished
    } else {
        ScanState::None
    };

    let start = timestamp_after(&original, &lower, "since ");
    let end = if info.state == ScanState::Scanning {
        None
    } else {
        timestamp_after(&original, &lower, " on ")
    };

    info.duration_secs = elapsed_after_in(&lower);
    if info.duration_secs == 0 {
        if let (Some(s), Some(e)) = (start, end) {
            info.duration_secs = (e - s).num_seconds().max(0) as u64;
        }
    }

    info.start_time = start.and_then(local_to_utc);
    info.end_time = end.and_then(local_to_utc);
    if info.start_time.is_none() && info.duration_secs > 0 {
        info.start_time = info
            .end_time
            .and_then(|e| start_before(e, info.duration_secs));
    }

    let (examined, scanned_total) = examined_and_total(&lower);
    info.examined_bytes = examined;
    info.total_bytes = value_after(&lower, "out of ")
        .or_else(|| value_before(&lower, " total"))
        .map(parse_size)
        .filter(|v| *v > 0)
        .unwrap_or(scanned_total);

    info.repaired_bytes = value_before(&lower, " repaired")
        .map(parse_size)
        .filter(|v| *v > 0)
        .or_else(|| {
            value_after(&lower, "repaired ")
                .or_else(|| value_after(&lower, "resilvered "))
                .map(parse_size)
        })
        .unwrap_or(0);

    info.errors = value_before(&lower, " errors")
        .filter(|v| v.chars().all(|c| c.is_ascii_digit()))
        .map(parse_count)
        .unwrap_or(0);

    info.progress_pct = value_before(&lower, "% done").map(parse_percent).unwrap_or(0.0);
    if info.state == ScanState::Finished {
        info.progress_pct = 100.0;
    }

    info.rate_bytes_per_sec = value_before(&lower, "/s").map(parse_size).unwrap_or(0);
    info.time_remaining_secs = time_remaining(&lower);

    info
}

/// `end - secs`, or `None` when the elapsed time is out of range.
fn start_before(end: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let elapsed = TimeDelta::try_seconds(i64::try_from(secs).ok()?)?;
    end.checked_sub_signed(elapsed)
}

/// The whitespace-delimited token ending right before `marker`.
fn value_before<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let idx = text.find(marker)?;
    let token = text[..idx]
        .rsplit(|c: char| c.is_whitespace() || c == ',')
        .next()?;
    (!token.is_empty()).then_some(token)
}

/// The whitespace-delimited token starting right after `marker`.
fn value_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let idx = text.find(marker)?;
    let token = text[idx + marker.len()..]
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()?;
    (!token.is_empty()).then_some(token)
}

/// Try every occurrence of `marker` until the text after it reads as a timestamp.
fn timestamp_after(original: &str, lower: &str, marker: &str) -> Option<chrono::NaiveDateTime> {
    lower
        .match_indices(marker)
        .find_map(|(idx, _)| parse_timestamp_prefix(&original[idx + marker.len()..]))
}

/// Elapsed time printed as `in HH:MM:SS` or `in 1 days HH:MM:SS`.
fn elapsed_after_in(lower: &str) -> u64 {
    lower
        .match_indices(" in ")
        .find_map(|(idx, marker)| {
            let rest = &lower[idx + marker.len()..];
            let mut words = rest.split_whitespace();
            let first = words.next()?;
            let secs = if first.contains(':') {
                parse_hms(first)
            } else if words.next().is_some_and(|w| w.starts_with("day")) {
                parse_duration_text(&rest.split_whitespace().take(3).collect::<Vec<_>>().join(" "))
            } else {
                0
            };
            (secs > 0).then_some(secs)
        })
        .unwrap_or(0)
}

/// `512G scanned` or the newer `512G / 1.00T scanned`.
fn examined_and_total(lower: &str) -> (u64, u64) {
    let Some(idx) = lower.find(" scanned") else {
        return (0, 0);
    };
    let words: Vec<&str> = lower[..idx].split_whitespace().collect();
    match words.as_slice() {
        [.., examined, "/", total] => (parse_size(examined), parse_size(total)),
        [.., examined] => (parse_size(examined.trim_matches(',')), 0),
        [] => (0, 0),
    }
}

/// Everything duration-shaped immediately before ` to go`.
fn time_remaining(lower: &str) -> u64 {
    let Some(idx) = lower.find(" to go") else {
        return 0;
    };
    let words: Vec<&str> = lower[..idx]
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .collect();

    let mut start = words.len();
    while start > 0 && is_duration_word(words[start - 1], words.get(start)) {
        start -= 1;
    }
    parse_duration_text(&words[start..].join(" "))
}

fn is_duration_word(word: &str, next: Option<&&str>) -> bool {
    if word.contains(':') {
        return word.chars().all(|c| c.is_ascii_digit() || c == ':');
    }
    if word.starts_with("day") {
        return true;
    }
    if word.chars().all(|c| c.is_ascii_digit()) {
        // a bare number only belongs to the duration when a unit follows it
        return next.is_some_and(|n| n.starts_with("day"));
    }
    let mut has_digit = false;
    for c in word.chars() {
        if c.is_ascii_digit() {
            has_digit = true;
        } else if !matches!(c, 'd' | 'h' | 'm' | 's') {
            return false;
        }
    }
    has_digit
}
