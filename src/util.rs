use chrono::{DateTime, Utc};

/// Timestamp format used everywhere in the database: UTC, millisecond
/// precision, `Z` suffix. Fixed width so lexicographic ordering matches
/// chronological ordering, and SQLite's `datetime()` can parse it.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn now_ts() -> String {
    Utc::now().format(TS_FORMAT).to_string()
}

pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Truncate a string to at most `max` characters (not bytes), so multi-byte
/// text is never cut mid-character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Collapse all runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        let ts = now_ts();
        assert!(parse_ts(&ts).is_some());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("안녕하세요", 3), "안녕하");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b   c  "), "a b c");
    }
}
