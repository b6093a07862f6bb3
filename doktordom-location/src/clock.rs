use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

/// Source of the current time for cache ages and elapsed measurements
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDT;
}

/// Wall clock that advances with tokio's clock, so it follows `tokio::time::pause` and
/// `tokio::time::advance` in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base_utc: UtcDT,
    base: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base_utc: Utc::now(),
            base: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> UtcDT {
        self.base_utc + TimeDelta::from_std(self.base.elapsed()).unwrap_or_default()
    }
}
