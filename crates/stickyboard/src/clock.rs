use chrono::{DateTime, Duration, Utc};

/// Wall clock that never repeats or goes backwards
///
/// Readings are truncated to microseconds so they survive a round trip
/// through SQLite's integer column unchanged.
#[derive(Debug, Clone, Default)]
pub struct MonotonicClock {
    last: Option<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Start after a previously persisted timestamp
    pub fn starting_after(last: DateTime<Utc>) -> Self {
        Self { last: Some(last) }
    }

    /// Next timestamp, strictly greater than every earlier one
    pub fn tick(&mut self) -> DateTime<Utc> {
        let now = truncate_micros(Utc::now());
        let next = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }
}

pub fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_strictly_increase() {
        let mut clock = MonotonicClock::new();
        let mut prev = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_starts_after_future_timestamp() {
        let future = truncate_micros(Utc::now()) + Duration::hours(1);
        let mut clock = MonotonicClock::starting_after(future);
        assert_eq!(clock.tick(), future + Duration::microseconds(1));
    }

    #[test]
    fn test_ticks_have_microsecond_precision() {
        let mut clock = MonotonicClock::new();
        let ts = clock.tick();
        assert_eq!(ts.timestamp_subsec_nanos() % 1000, 0);
    }
}
