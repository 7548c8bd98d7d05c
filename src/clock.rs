use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;

/// A source of wall-clock instants for the scheduler.
///
/// Trigger rules compare UTC calendar fields, so implementations must return
/// instants with a UTC offset.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}

/// A clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
///
/// Cloned handles share the same instant, so a test can keep one handle and
/// give the other to a scheduler.
#[derive(Debug, Clone)]
pub struct ManualClock {
    instant: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(instant: OffsetDateTime) -> Self {
        Self {
            instant: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn set(&self, instant: OffsetDateTime) {
        *self.lock() = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OffsetDateTime> {
        // A poisoned instant is still a valid instant.
        self.instant.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.lock()
    }
}

/// Drop sub-second precision so tick instants compare on whole seconds.
pub fn truncate_to_second(instant: OffsetDateTime) -> OffsetDateTime {
    instant.replace_nanosecond(0).unwrap_or(instant)
}

/// Start of the minute `instant` falls in.
pub fn truncate_to_minute(instant: OffsetDateTime) -> OffsetDateTime {
    truncate_to_second(instant)
        .replace_second(0)
        .unwrap_or(instant)
}
