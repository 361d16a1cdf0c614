//! Tick Clock
//!
//! Monotonic simulation clock with nanosecond resolution.
//! All scenario time comes from the simulation feed - never from system time.

use std::fmt;

/// Nanoseconds since scenario start.
pub type Nanos = i64;

/// Conversion constants
pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Convert fractional milliseconds (the simulator's native unit) to `Nanos`.
#[inline]
pub fn millis_to_nanos(ms: f64) -> Nanos {
    (ms * NANOS_PER_MILLI as f64).round() as Nanos
}

/// Convert `Nanos` to fractional seconds.
#[inline]
pub fn nanos_to_secs(t: Nanos) -> f64 {
    t as f64 / NANOS_PER_SEC as f64
}

/// Monotonic tick clock.
///
/// # Determinism Contract
/// - `now()` returns the time of the last observed tick, never system time
/// - `advance_to()` only moves forward; a backward timestamp is clamped to the
///   current time and yields a zero duration
/// - The first tick has no predecessor, so its duration is the configured
///   default step
#[derive(Debug, Clone)]
pub struct TickClock {
    current: Option<Nanos>,
    default_step: Nanos,
    ticks: u64,
}

impl TickClock {
    /// Create a clock whose first tick lasts `default_step_s` seconds.
    pub fn new(default_step_s: f64) -> Self {
        Self {
            current: None,
            default_step: (default_step_s.max(0.0) * NANOS_PER_SEC as f64).round() as Nanos,
            ticks: 0,
        }
    }

    /// Time of the last tick, or 0 before the first one.
    #[inline]
    pub fn now(&self) -> Nanos {
        self.current.unwrap_or(0)
    }

    /// Time of the last tick in seconds.
    #[inline]
    pub fn now_secs(&self) -> f64 {
        nanos_to_secs(self.now())
    }

    /// Number of ticks observed so far.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance to `new_time` and return the tick duration in nanoseconds.
    pub fn advance_to(&mut self, new_time: Nanos) -> Nanos {
        self.ticks += 1;
        match self.current {
            None => {
                self.current = Some(new_time);
                self.default_step
            }
            Some(prev) if new_time < prev => {
                tracing::warn!(prev, new_time, "tick clock went backward, holding time");
                0
            }
            Some(prev) => {
                self.current = Some(new_time);
                new_time - prev
            }
        }
    }

    /// Advance to `new_time` and return the tick duration in seconds.
    #[inline]
    pub fn advance_to_secs(&mut self, new_time: Nanos) -> f64 {
        nanos_to_secs(self.advance_to(new_time))
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl fmt::Display for TickClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = self.now();
        write!(f, "{}.{:09}s", now / NANOS_PER_SEC, now % NANOS_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_uses_default_step() {
        let mut clock = TickClock::new(0.05);
        assert_eq!(clock.advance_to(1_000 * NANOS_PER_MILLI), 50 * NANOS_PER_MILLI);
        assert_eq!(clock.now(), NANOS_PER_SEC);
    }

    #[test]
    fn test_dt_between_ticks() {
        let mut clock = TickClock::new(0.01);
        clock.advance_to(0);
        let dt = clock.advance_to_secs(millis_to_nanos(20.0));
        assert!((dt - 0.02).abs() < 1e-12);
        assert_eq!(clock.ticks(), 2);
    }

    #[test]
    fn test_backward_time_is_held() {
        let mut clock = TickClock::new(0.01);
        clock.advance_to(5 * NANOS_PER_SEC);
        assert_eq!(clock.advance_to(4 * NANOS_PER_SEC), 0);
        assert_eq!(clock.now(), 5 * NANOS_PER_SEC);
    }

    #[test]
    fn test_display() {
        let mut clock = TickClock::new(0.01);
        clock.advance_to(1_500 * NANOS_PER_MILLI);
        assert_eq!(format!("{}", clock), "1.500000000s");
    }
}
