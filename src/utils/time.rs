//! Time utility functions

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Convert microseconds since Unix epoch to DateTime<Utc>
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_else(|| {
        tracing::warn!(micros, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Convert microseconds since Unix epoch to ISO 8601 string (microsecond precision)
pub fn micros_to_iso(micros: i64) -> String {
    micros_to_datetime(micros).to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Convert days since Unix epoch (DuckDB DATE storage) to an ISO date string
pub fn days_to_iso_date(days: i32) -> String {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date");
    epoch
        .checked_add_signed(Duration::days(days as i64))
        .unwrap_or(epoch)
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip() {
        let dt = micros_to_datetime(1_700_000_000_000_000);
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn micros_to_iso_precision() {
        assert_eq!(micros_to_iso(0), "1970-01-01T00:00:00.000000Z");
    }

    #[test]
    fn days_to_date() {
        assert_eq!(days_to_iso_date(0), "1970-01-01");
        assert_eq!(days_to_iso_date(19723), "2024-01-01");
    }
}
