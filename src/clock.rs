use chrono::{DateTime, FixedOffset, Utc};

/// Build the display offset from whole hours east of UTC.
pub fn offset_from_hours(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

pub fn now(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// Fractional unix seconds, the stamp format of the session table.
pub fn unix_seconds(at: &DateTime<FixedOffset>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_out_of_range_offsets() {
        assert!(offset_from_hours(7).is_some());
        assert!(offset_from_hours(-12).is_some());
        assert!(offset_from_hours(30).is_none());
    }

    #[test]
    fn unix_seconds_keeps_millisecond_precision() {
        let offset = offset_from_hours(7).unwrap();
        let at = offset.timestamp_millis_opt(1_700_000_000_250).unwrap();
        assert_eq!(unix_seconds(&at), 1_700_000_000.25);
    }
}
