//! Threshold Detector
//!
//! Stateful comparator shared by every KPI rule. A detector turns a scalar
//! signal plus a [`Trigger`] into a monotonically increasing event count and
//! the outcome of the latest comparison.
//!
//! # Building Blocks
//!
//! - [`ThresholdDetector`] - the commit point; every call whose predicate holds
//!   adds exactly one to the count
//! - [`EdgeLatch`] - "event in progress" memory used to commit once per
//!   real-world event instead of once per tick
//! - [`DurationAccumulator`] - integrates tick duration while a condition holds
//!   and yields the total when it breaks
//!
//! # Usage
//!
//! ```ignore
//! let mut detector = ThresholdDetector::new();
//! for speed in [10.0, 20.0, 35.0, 40.0, 25.0] {
//!     detector.detect(speed, Trigger::above(30.0));
//! }
//! assert_eq!(detector.count(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer sentinels used by KPI configuration files for "no bound".
pub const UNBOUNDED_LOW_SENTINEL: f64 = i32::MIN as f64;
pub const UNBOUNDED_HIGH_SENTINEL: f64 = i32::MAX as f64;

// =============================================================================
// BOUNDS AND TRIGGERS
// =============================================================================

/// One side of a comparison. `Unbounded` never triggers, which keeps it
/// distinct from a numeric bound of 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Unbounded,
    At(f64),
}

impl Bound {
    /// Map the legacy integer sentinels and non-finite values to `Unbounded`.
    pub fn from_value(value: f64) -> Self {
        if !value.is_finite()
            || value <= UNBOUNDED_LOW_SENTINEL
            || value >= UNBOUNDED_HIGH_SENTINEL
        {
            Bound::Unbounded
        } else {
            Bound::At(value)
        }
    }

    #[inline]
    pub fn value(&self) -> Option<f64> {
        match self {
            Bound::Unbounded => None,
            Bound::At(v) => Some(*v),
        }
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Bound::Unbounded)
    }
}

impl From<f64> for Bound {
    fn from(value: f64) -> Self {
        Bound::At(value)
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Unbounded => write!(f, "unbounded"),
            Bound::At(v) => write!(f, "{}", v),
        }
    }
}

/// Comparison mode chosen by each call site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// `value >= threshold` triggers.
    Above(Bound),
    /// `value <= threshold` triggers.
    Below(Bound),
    /// `value` strictly outside `[lower, upper]` triggers.
    Outside { lower: Bound, upper: Bound },
}

impl Trigger {
    #[inline]
    pub fn above(threshold: f64) -> Self {
        Trigger::Above(Bound::At(threshold))
    }

    #[inline]
    pub fn below(threshold: f64) -> Self {
        Trigger::Below(Bound::At(threshold))
    }

    #[inline]
    pub fn outside(lower: Bound, upper: Bound) -> Self {
        Trigger::Outside { lower, upper }
    }

    /// Evaluate the predicate. NaN never triggers.
    pub fn is_triggered(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match *self {
            Trigger::Above(Bound::At(t)) => value >= t,
            Trigger::Below(Bound::At(t)) => value <= t,
            Trigger::Above(Bound::Unbounded) | Trigger::Below(Bound::Unbounded) => false,
            Trigger::Outside { lower, upper } => {
                let under = matches!(lower, Bound::At(l) if value < l);
                let over = matches!(upper, Bound::At(u) if value > u);
                under || over
            }
        }
    }
}

// =============================================================================
// THRESHOLD DETECTOR
// =============================================================================

/// Monotonic event counter.
///
/// Has no reset; Init builds a fresh detector, so the count only grows
/// within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdDetector {
    count: u64,
    latest: bool,
    calls: u64,
}

impl ThresholdDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `value` against `trigger`; on a hit the count grows by exactly 1.
    pub fn detect(&mut self, value: f64, trigger: Trigger) -> bool {
        self.commit(trigger.is_triggered(value))
    }

    /// Commit a precomputed boolean condition.
    pub fn detect_flag(&mut self, hit: bool) -> bool {
        self.commit(hit)
    }

    #[inline]
    fn commit(&mut self, hit: bool) -> bool {
        self.calls += 1;
        self.latest = hit;
        if hit {
            self.count += 1;
        }
        hit
    }

    /// Cumulative number of triggered calls.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Outcome of the most recent call (false before the first call).
    #[inline]
    pub fn latest_state(&self) -> bool {
        self.latest
    }

    /// Total number of calls, triggered or not.
    #[inline]
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

// =============================================================================
// EDGE LATCH
// =============================================================================

/// What an [`EdgeLatch`] did on one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchTransition {
    /// Inactive and stays inactive.
    Idle,
    /// Became active on this update.
    Entered,
    /// Active before and after this update.
    Held,
    /// Became inactive on this update.
    Released,
}

impl LatchTransition {
    /// True when the latch is active after the update.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, LatchTransition::Entered | LatchTransition::Held)
    }
}

/// Boolean hysteresis memory for events that span many ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeLatch {
    active: bool,
    entries: u64,
}

impl EdgeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter on `enter` while inactive, leave on `release` while active.
    /// Entering and releasing never happen on the same update.
    pub fn update(&mut self, enter: bool, release: bool) -> LatchTransition {
        match (self.active, enter, release) {
            (false, true, _) => {
                self.active = true;
                self.entries += 1;
                LatchTransition::Entered
            }
            (false, false, _) => LatchTransition::Idle,
            (true, _, true) => {
                self.active = false;
                LatchTransition::Released
            }
            (true, _, false) => LatchTransition::Held,
        }
    }

    /// Level-triggered form: active exactly while `condition` holds.
    #[inline]
    pub fn follow(&mut self, condition: bool) -> LatchTransition {
        self.update(condition, !condition)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of times the latch has been entered.
    #[inline]
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

// =============================================================================
// DURATION ACCUMULATOR
// =============================================================================

/// Integrates elapsed tick time while a condition holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationAccumulator {
    accumulated_s: f64,
    longest_s: f64,
}

impl DurationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `dt_s` while `condition` holds. When the condition breaks after a
    /// non-empty run, the run length is returned and accumulation restarts at 0.
    pub fn accumulate(&mut self, condition: bool, dt_s: f64) -> Option<f64> {
        if condition {
            self.accumulated_s += dt_s.max(0.0);
            self.longest_s = self.longest_s.max(self.accumulated_s);
            return None;
        }
        if self.accumulated_s > 0.0 {
            let run = self.accumulated_s;
            self.accumulated_s = 0.0;
            Some(run)
        } else {
            None
        }
    }

    /// Length of the run in progress.
    #[inline]
    pub fn current(&self) -> f64 {
        self.accumulated_s
    }

    /// Longest run seen so far, including one still in progress.
    #[inline]
    pub fn longest(&self) -> f64 {
        self.longest_s
    }
}
