use chrono::{DateTime, Utc};

/// Source of business timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn manual_clock_is_frozen_until_advanced() {
        let start = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(2));
        assert_eq!(clock.now(), start + Duration::seconds(2));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(Utc::now());
        let other = clock.clone();

        clock.advance(Duration::milliseconds(5));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn manual_clock_drops_sub_microsecond_precision() {
        let start = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now().timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    #[should_panic(expected = "manual clock overflowed")]
    fn manual_clock_refuses_to_wrap() {
        let clock = ManualClock::new(Utc::now());
        clock.advance(Duration::microseconds(i64::MAX));
    }

    #[test]
    fn system_clock_moves_forward() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
