//! Time sources for the decision engine.
//!
//! The engine never reads the wall clock directly. It asks a
//! [`TimeSource`] once per tick, so tests and simulations can drive time
//! by hand with a [`ManualClock`].

use chrono::Utc;

/// Source of the current time in seconds.
pub trait TimeSource {
    /// Current time in seconds since an arbitrary epoch.
    fn current_time(&self) -> f64;
}

/// Wall clock: seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new wall clock.
    pub const fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemClock {
    fn current_time(&self) -> f64 {
        // Microseconds since 1970 stay well inside f64's exact integer range.
        #[allow(clippy::cast_precision_loss)]
        let micros = Utc::now().timestamp_micros() as f64;
        micros / 1_000_000.0
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManualClock {
    now: f64,
}

impl ManualClock {
    /// Clock reading `start`.
    pub const fn new(start: f64) -> Self {
        Self { now: start }
    }

    /// Jump to `now`.
    pub const fn set(&mut self, now: f64) {
        self.now = now;
    }

    /// Move forward by `seconds`.
    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds;
    }
}

impl TimeSource for ManualClock {
    fn current_time(&self) -> f64 {
        self.now
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_request() {
        let mut clock = ManualClock::new(10.0);
        clock.advance(2.5);
        assert!((clock.current_time() - 12.5).abs() < f64::EPSILON);
        clock.set(3.0);
        assert!((clock.current_time() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock::new().current_time() > 1_577_836_800.0);
    }
}
