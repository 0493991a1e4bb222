use time::OffsetDateTime;

/// Single source of truth for "now". Deadlines and remaining time are always
/// computed from this clock; client-reported elapsed time is never trusted.
pub(crate) trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
