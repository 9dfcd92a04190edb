use std::time::{SystemTime, UNIX_EPOCH};
use chrono::DateTime;

pub fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Parse an instant given either as RFC 3339 text or as epoch milliseconds.
pub fn parse_instant_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ms) = raw.parse::<i64>() {
        return (ms >= 0).then_some(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
        .filter(|ms| *ms >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_epoch_millis() {
        assert_eq!(parse_instant_ms("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_instant_ms("2018-08-30T13:23:23.000+00:00"), Some(1535635403000));
        assert_eq!(parse_instant_ms("1535635403000"), Some(1535635403000));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_instant_ms(""), None);
        assert_eq!(parse_instant_ms("yesterday"), None);
        assert_eq!(parse_instant_ms("-5"), None);
        assert_eq!(parse_instant_ms("2018-13-45T99:00:00Z"), None);
    }
}
