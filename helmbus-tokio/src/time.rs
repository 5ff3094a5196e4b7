use std::time::{SystemTime, UNIX_EPOCH};

use helmbus_core::time::TimeSource;

/// The system wall clock as fractional seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now(&self) -> f64 {
        wall_time()
    }
}

/// Current wall time as fractional seconds since the Unix epoch.
pub fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
