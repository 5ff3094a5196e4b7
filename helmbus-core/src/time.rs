//! Time source abstraction
//!
//! The directory and broker take `now` as an explicit argument on every
//! mutating call, so the core never reads a clock itself. Tests inject
//! synthetic time, and the server layer supplies the wall clock through
//! this trait.

/// A source of timestamps, in seconds since the Unix epoch.
pub trait TimeSource: Send + Sync + 'static {
    fn now(&self) -> f64;
}

/// Fixed-time source for tests and tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTime(pub f64);

impl TimeSource for FixedTime {
    fn now(&self) -> f64 {
        self.0
    }
}
