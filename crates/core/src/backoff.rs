use std::time::Duration;

/// First retry delay after a stream drop.
pub const RECONNECT_FLOOR: Duration = Duration::from_secs(1);
/// Retry delay ceiling.
pub const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Pure reconnect backoff policy: 1s doubling per failed attempt, capped at
/// 30s. `attempt` counts consecutive failures since the last successful
/// connection (0 = first retry). Callers reset the counter to 0 when a
/// connection opens.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(5);
    Duration::from_secs(secs).min(RECONNECT_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_floor_and_doubles() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(2), Duration::from_secs(4));
        assert_eq!(reconnect_delay(3), Duration::from_secs(8));
        assert_eq!(reconnect_delay(4), Duration::from_secs(16));
    }

    #[test]
    fn caps_at_thirty_seconds() {
        assert_eq!(reconnect_delay(5), RECONNECT_CAP);
        assert_eq!(reconnect_delay(6), RECONNECT_CAP);
        assert_eq!(reconnect_delay(u32::MAX), RECONNECT_CAP);
    }

    #[test]
    fn monotonically_non_decreasing() {
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let d = reconnect_delay(attempt);
            assert!(d >= prev);
            prev = d;
        }
    }
}
