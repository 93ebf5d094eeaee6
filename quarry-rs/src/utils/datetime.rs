//! Timestamp helpers for values stored as strings in the graph store.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Format a timestamp the way the Neo4j driver stores it:
/// `"2024-01-15T10:30:00.000000000Z"`.
pub fn format_graph_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

/// Parse a stored timestamp. Accepts RFC 3339 and zone-less ISO 8601
/// (assumed UTC); returns `None` for anything else.
pub fn parse_graph_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_then_parse_preserves_instant() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let s = format_graph_datetime(&dt);
        assert_eq!(s, "2024-01-15T10:30:00.000000000Z");
        assert_eq!(parse_graph_datetime(&s), Some(dt));
    }

    #[test]
    fn parse_accepts_zoneless_iso() {
        let dt = parse_graph_datetime("2024-01-15T10:30:00.5").unwrap();
        assert_eq!(dt.timestamp(), Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap().timestamp());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_graph_datetime("").is_none());
        assert!(parse_graph_datetime("yesterday").is_none());
    }
}
