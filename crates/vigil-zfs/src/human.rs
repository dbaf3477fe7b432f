//! Total parsers for the human-oriented values `zpool` prints: sizes, ratios,
//! percentages, durations and timestamps. None of them fail; unreadable input
//! yields zero (or `None` for timestamps).

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Timestamp layouts seen in `zpool status` and `zpool history` output.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%a %b %d %H:%M:%S %Y",
    "%b %d %H:%M:%S %Y",
    "%a %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d.%H:%M:%S",
];

const WEEKDAYS: &[&str] = &["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Longest candidate the trim-retry loop will start from.
const MAX_TIMESTAMP_CHARS: usize = 48;
const MIN_TIMESTAMP_CHARS: usize = 8;

/// Parse `512G`, `1.00T`, `0B`, `4.5GiB` or a plain byte count (binary multiples).
pub fn parse_size(value: &str) -> u64 {
    let value = value.trim();
    if value.is_empty() || value == "-" {
        return 0;
    }
    if let Ok(raw) = value.parse::<u64>() {
        return raw;
    }

    let lower = value.to_ascii_lowercase();
    let unitless = lower
        .strip_suffix("ib")
        .or_else(|| lower.strip_suffix('b'))
        .unwrap_or(&lower);

    let (number, exponent) = match unitless.chars().last() {
        Some('k') => (&unitless[..unitless.len() - 1], 1),
        Some('m') => (&unitless[..unitless.len() - 1], 2),
        Some('g') => (&unitless[..unitless.len() - 1], 3),
        Some('t') => (&unitless[..unitless.len() - 1], 4),
        Some('p') => (&unitless[..unitless.len() - 1], 5),
        Some('e') => (&unitless[..unitless.len() - 1], 6),
        _ => (unitless, 0),
    };

    match number.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => (n * 1024f64.powi(exponent)).round() as u64,
        _ => 0,
    }
}

/// Error counters use the same suffixed notation once they grow past 1000.
pub fn parse_count(value: &str) -> u64 {
    parse_size(value)
}

/// `5%`, `5`, `-` → 5.0, 5.0, 0.0
pub fn parse_percent(value: &str) -> f64 {
    parse_float(value.trim().trim_end_matches('%'))
}

/// `1.00x` → 1.0
pub fn parse_ratio(value: &str) -> f64 {
    let value = value.trim();
    parse_float(
        value
            .strip_suffix('x')
            .or_else(|| value.strip_suffix('X'))
            .unwrap_or(value),
    )
}

fn parse_float(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// `HH:MM:SS` → seconds. Any other shape yields zero.
pub fn parse_hms(value: &str) -> u64 {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return 0;
    }
    let mut total = 0u64;
    for (part, scale) in parts.iter().zip([3600u64, 60, 1]) {
        match part.parse::<u64>() {
            Ok(n) => total = total.saturating_add(n.saturating_mul(scale)),
            Err(_) => return 0,
        }
    }
    total
}

/// Free-form durations: `02:30:00`, `2 days 01:00:00`, `1h 30m 20s`, `1h30m`,
/// `45 seconds`. Unrecognized words are ignored.
pub fn parse_duration_text(value: &str) -> u64 {
    let lower = value.to_ascii_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    let mut total = 0u64;
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token.contains(':') {
            total = total.saturating_add(parse_hms(token));
        } else if let Ok(n) = token.parse::<u64>() {
            // "2 days", "5 min"
            if let Some(scale) = tokens.get(i + 1).and_then(|unit| unit_scale(unit)) {
                total = total.saturating_add(n.saturating_mul(scale));
                i += 1;
            }
        } else {
            total = total.saturating_add(parse_compact_duration(token));
        }
        i += 1;
    }
    total
}

fn unit_scale(unit: &str) -> Option<u64> {
    if unit.starts_with("day") || unit == "d" {
        Some(86_400)
    } else if unit.starts_with("hour") || unit.starts_with("hr") || unit == "h" {
        Some(3_600)
    } else if unit.starts_with("min") || unit == "m" {
        Some(60)
    } else if unit.starts_with("sec") || unit == "s" {
        Some(1)
    } else {
        None
    }
}

/// `1h30m20s` style tokens.
fn parse_compact_duration(token: &str) -> u64 {
    let mut total = 0u64;
    let mut digits = String::new();
    for c in token.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let scale = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return total,
        };
        if let Ok(n) = digits.parse::<u64>() {
            total = total.saturating_add(n.saturating_mul(scale));
        }
        digits.clear();
    }
    total
}

/// Parse a complete timestamp in any of [`TIMESTAMP_FORMATS`].
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let normalized = collapse_whitespace(value);
    if normalized.is_empty() {
        return None;
    }
    if let Some(ts) = try_formats(&normalized) {
        return Some(ts);
    }
    // A weekday that disagrees with the date makes chrono reject the whole string.
    let (first, rest) = normalized.split_once(' ')?;
    if WEEKDAYS.iter().any(|d| first.to_ascii_lowercase().starts_with(d)) {
        return try_formats(rest);
    }
    None
}

fn try_formats(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Parse a timestamp at the start of `text` whose end is unknown: the
/// candidate is shortened from the right until some format accepts it.
pub fn parse_timestamp_prefix(text: &str) -> Option<NaiveDateTime> {
    let normalized = collapse_whitespace(text);
    let mut candidate: String = normalized.chars().take(MAX_TIMESTAMP_CHARS).collect();
    while candidate.chars().count() >= MIN_TIMESTAMP_CHARS {
        let trimmed = candidate.trim_end_matches(|c: char| c == ',' || c == ';' || c == '.');
        if let Some(ts) = parse_timestamp(trimmed) {
            return Some(ts);
        }
        candidate.pop();
    }
    None
}

/// `zpool` prints wall-clock local time.
pub fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
