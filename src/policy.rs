use chrono::{DateTime, Utc};

use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Decides how long a stored value may be served before it has to be synced again
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvalidationPolicy {
    /// Stored values never expire
    #[default]
    Never,
    Hourly,
    Daily,
    Custom(Duration),
}

impl InvalidationPolicy {
    /// The age after which a stored value is no longer valid, `None` if it never expires
    pub fn max_age(&self) -> Option<Duration> {
        match self {
            InvalidationPolicy::Never => None,
            InvalidationPolicy::Hourly => Some(HOUR),
            InvalidationPolicy::Daily => Some(DAY),
            InvalidationPolicy::Custom(max_age) => Some(*max_age),
        }
    }

    /// Returns true if a value stored at `stored_at` is too old to serve at `now`
    pub fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.max_age() {
            Some(max_age) => age(stored_at, now) >= max_age,
            None => false,
        }
    }

    pub fn is_valid(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        !self.is_expired(stored_at, now)
    }
}

/// Time elapsed between `stored_at` and `now`, a timestamp from the future counts as brand new
pub(crate) fn age(stored_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - stored_at).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod test {
    use super::*;

    fn ago(duration: Duration) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::from_std(duration).unwrap()
    }

    #[test]
    fn test_never_is_always_valid() {
        let policy = InvalidationPolicy::Never;

        assert_eq!(policy.max_age(), None);
        assert!(policy.is_valid(ago(DAY * 365), Utc::now()));
    }

    #[test]
    fn test_hourly_and_daily() {
        let now = Utc::now();

        assert!(InvalidationPolicy::Hourly.is_valid(ago(Duration::from_secs(59 * 60)), now));
        assert!(InvalidationPolicy::Hourly.is_expired(ago(Duration::from_secs(61 * 60)), now));

        assert!(InvalidationPolicy::Daily.is_valid(ago(Duration::from_secs(23 * 60 * 60)), now));
        assert!(InvalidationPolicy::Daily.is_expired(ago(Duration::from_secs(25 * 60 * 60)), now));
    }

    #[test]
    fn test_custom_boundary_is_expired() {
        let now = Utc::now();
        let policy = InvalidationPolicy::Custom(Duration::from_millis(200));

        assert!(policy.is_valid(now - chrono::Duration::milliseconds(199), now));
        assert!(policy.is_expired(now - chrono::Duration::milliseconds(200), now));
    }

    #[test]
    fn test_future_timestamps_are_fresh() {
        let now = Utc::now();
        let policy = InvalidationPolicy::Custom(Duration::from_secs(1));

        assert_eq!(age(now + chrono::Duration::seconds(30), now), Duration::ZERO);
        assert!(policy.is_valid(now + chrono::Duration::seconds(30), now));
    }
}
