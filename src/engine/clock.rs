//! Wall-clock source for target-time comparison

use chrono::{Local, NaiveDateTime};

/// Local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's local time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Wall time pinned to an anchor and advanced by tokio's clock.
///
/// Under a paused tokio runtime this moves only when the runtime's time does,
/// so timer-driven behavior and target-time checks stay consistent.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    anchor: NaiveDateTime,
    origin: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(anchor: NaiveDateTime) -> Self {
        Self {
            anchor,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor + elapsed
    }
}
