use chrono::{DateTime, Utc};

/// Time source for use-cases. Tests inject fixed instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Render a timestamp the way every persisted record does: UTC RFC 3339,
/// second precision, `Z` suffix.
pub fn format_rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub mod fixed {
    use super::*;
    use std::sync::Mutex;

    /// Test clock returning a settable instant.
    pub struct FixedClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.now.lock().unwrap() = now;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rfc3339() {
        let time = DateTime::parse_from_rfc3339("2026-02-01T12:30:45.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_rfc3339(time), "2026-02-01T12:30:45Z");
    }

    #[test]
    fn test_fixed_clock() {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = fixed::FixedClock::at(start);
        assert_eq!(clock.now(), start);

        let later = start + chrono::Duration::seconds(90);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
