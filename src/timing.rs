use std::time::{Duration, Instant};

use actix_web::http::StatusCode;
use time::{OffsetDateTime, UtcOffset};

use crate::event::Level;

/// Requests taking strictly longer than this are reported as slow.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

/// Timezone used for the reported `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZone {
    /// Local offset of the host. Falls back to UTC when the offset cannot be
    /// determined safely (e.g. on multi-threaded Unix processes).
    #[default]
    Local,
    Utc,
}

/// Entry time of a request plus a monotonic start point.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    entry: OffsetDateTime,
    started: Instant,
    zone: TimeZone,
}

impl Clock {
    pub fn start(zone: TimeZone) -> Self {
        Clock {
            entry: OffsetDateTime::now_utc(),
            started: Instant::now(),
            zone,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Entry time in the configured timezone.
    pub fn timestamp(&self) -> OffsetDateTime {
        match self.zone {
            TimeZone::Utc => self.entry,
            TimeZone::Local => match UtcOffset::current_local_offset() {
                Ok(offset) => self.entry.to_offset(offset),
                Err(_) => self.entry,
            },
        }
    }
}

/// Band of a final response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Redirection,
    ClientError,
    ServerError,
}

impl Outcome {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            500.. => Outcome::ServerError,
            400..=499 => Outcome::ClientError,
            300..=399 => Outcome::Redirection,
            _ => Outcome::Completed,
        }
    }

    pub fn level(self) -> Level {
        match self {
            Outcome::ServerError => Level::Error,
            Outcome::ClientError => Level::Warn,
            Outcome::Redirection | Outcome::Completed => Level::Info,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Outcome::ServerError => "Server error",
            Outcome::ClientError => "Client error",
            Outcome::Redirection => "Redirection",
            Outcome::Completed => "Request completed",
        }
    }
}

pub fn is_slow(latency: Duration, threshold: Duration) -> bool {
    latency > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_bands() {
        let cases = [
            (200, Outcome::Completed, Level::Info),
            (101, Outcome::Completed, Level::Info),
            (204, Outcome::Completed, Level::Info),
            (301, Outcome::Redirection, Level::Info),
            (399, Outcome::Redirection, Level::Info),
            (400, Outcome::ClientError, Level::Warn),
            (404, Outcome::ClientError, Level::Warn),
            (499, Outcome::ClientError, Level::Warn),
            (500, Outcome::ServerError, Level::Error),
            (503, Outcome::ServerError, Level::Error),
        ];

        for (code, outcome, level) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(Outcome::from_status(status), outcome, "status {code}");
            assert_eq!(outcome.level(), level, "status {code}");
        }

        assert_eq!(Outcome::ServerError.message(), "Server error");
        assert_eq!(Outcome::Completed.message(), "Request completed");
    }

    #[test]
    fn test_slow_threshold_is_strict() {
        assert!(!is_slow(SLOW_REQUEST_THRESHOLD, SLOW_REQUEST_THRESHOLD));
        assert!(is_slow(
            SLOW_REQUEST_THRESHOLD + Duration::from_millis(1),
            SLOW_REQUEST_THRESHOLD
        ));
        assert!(!is_slow(Duration::from_millis(10), SLOW_REQUEST_THRESHOLD));
    }

    #[test]
    fn test_clock() {
        let clock = Clock::start(TimeZone::Utc);
        assert_eq!(clock.timestamp().offset(), UtcOffset::UTC);
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.elapsed() >= Duration::from_millis(5));

        let local = Clock::start(TimeZone::Local);
        assert_eq!(local.timestamp().unix_timestamp(), local.entry.unix_timestamp());
    }
}
