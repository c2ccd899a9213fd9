use time::{Duration, OffsetDateTime, PrimitiveDateTime};

pub fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub fn minutes(value: i32) -> Duration {
    Duration::minutes(i64::from(value))
}

pub(crate) fn seconds_as_duration(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn minutes_handles_negative_offsets() {
        let start = datetime!(2025-01-02 10:00:00);
        assert_eq!(start + minutes(-15), datetime!(2025-01-02 09:45:00));
    }

    #[test]
    fn seconds_as_duration_saturates() {
        assert_eq!(seconds_as_duration(u64::MAX), Duration::seconds(i64::MAX));
    }
}
