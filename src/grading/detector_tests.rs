//! Tests for the Threshold Detector
//!
//! These tests verify:
//! 1. Count grows by exactly the number of triggered calls
//! 2. Unbounded sides never trigger and differ from a bound of 0
//! 3. Edge latch and duration accumulator commit once per event

use super::detector::*;

// =============================================================================
// COUNTING
// =============================================================================

#[test]
fn test_speed_sequence_counts_two() {
    let mut detector = ThresholdDetector::new();
    for speed in [10.0, 20.0, 35.0, 40.0, 25.0] {
        detector.detect(speed, Trigger::above(30.0));
    }
    assert_eq!(detector.count(), 2);
    assert_eq!(detector.calls(), 5);
    assert!(!detector.latest_state());
}

#[test]
fn test_count_is_monotonic_and_exact() {
    // Deterministic pseudo-random walk over mixed trigger modes.
    let triggers = [
        Trigger::above(0.5),
        Trigger::below(-0.2),
        Trigger::outside(Bound::At(-0.7), Bound::At(0.7)),
        Trigger::outside(Bound::Unbounded, Bound::At(0.1)),
    ];
    let mut detector = ThresholdDetector::new();
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut expected = 0;
    let mut previous = 0;

    for i in 0..500 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let value = (state % 2000) as f64 / 1000.0 - 1.0;
        let trigger = triggers[i % triggers.len()];

        let hit = detector.detect(value, trigger);
        if trigger.is_triggered(value) {
            expected += 1;
        }
        assert_eq!(hit, detector.latest_state());
        assert!(detector.count() >= previous);
        assert!(detector.count() - previous <= 1);
        previous = detector.count();
    }
    assert_eq!(detector.count(), expected);
}

#[test]
fn test_above_and_below_are_inclusive() {
    assert!(Trigger::above(30.0).is_triggered(30.0));
    assert!(!Trigger::above(30.0).is_triggered(29.999));
    assert!(Trigger::below(-2.0).is_triggered(-2.0));
    assert!(!Trigger::below(-2.0).is_triggered(-1.5));
}

#[test]
fn test_outside_is_exclusive() {
    let trigger = Trigger::outside(Bound::At(-3.0), Bound::At(2.0));
    assert!(!trigger.is_triggered(-3.0));
    assert!(!trigger.is_triggered(2.0));
    assert!(trigger.is_triggered(-3.01));
    assert!(trigger.is_triggered(2.01));
}

#[test]
fn test_nan_never_triggers() {
    let mut detector = ThresholdDetector::new();
    assert!(!detector.detect(f64::NAN, Trigger::above(0.0)));
    assert!(!detector.detect(f64::NAN, Trigger::outside(Bound::At(0.0), Bound::At(0.0))));
    assert_eq!(detector.count(), 0);
    assert_eq!(detector.calls(), 2);
}

// =============================================================================
// UNBOUNDED SENTINEL
// =============================================================================

#[test]
fn test_unbounded_differs_from_zero() {
    let zero = Trigger::Above(Bound::At(0.0));
    let open = Trigger::Above(Bound::Unbounded);
    for value in [0.0, 1.0, 1e9] {
        assert!(zero.is_triggered(value));
        assert!(!open.is_triggered(value));
    }
    assert!(!Trigger::Below(Bound::Unbounded).is_triggered(-1e9));
}

#[test]
fn test_sentinels_map_to_unbounded() {
    assert_eq!(Bound::from_value(UNBOUNDED_LOW_SENTINEL), Bound::Unbounded);
    assert_eq!(Bound::from_value(UNBOUNDED_HIGH_SENTINEL), Bound::Unbounded);
    assert_eq!(Bound::from_value(f64::INFINITY), Bound::Unbounded);
    assert_eq!(Bound::from_value(0.0), Bound::At(0.0));
    assert_eq!(Bound::from_value(-4.5), Bound::At(-4.5));
}

#[test]
fn test_one_sided_band() {
    let upper_only = Trigger::outside(Bound::Unbounded, Bound::At(2.0));
    assert!(!upper_only.is_triggered(-1e6));
    assert!(upper_only.is_triggered(2.5));

    let lower_only = Trigger::outside(Bound::At(-3.0), Bound::Unbounded);
    assert!(lower_only.is_triggered(-3.5));
    assert!(!lower_only.is_triggered(1e6));
}

// =============================================================================
// EDGE LATCH
// =============================================================================

#[test]
fn test_latch_transitions() {
    let mut latch = EdgeLatch::new();
    assert_eq!(latch.update(false, false), LatchTransition::Idle);
    assert_eq!(latch.update(true, false), LatchTransition::Entered);
    assert_eq!(latch.update(true, false), LatchTransition::Held);
    // enter is ignored while active
    assert_eq!(latch.update(true, true), LatchTransition::Released);
    assert_eq!(latch.update(false, true), LatchTransition::Idle);
    assert_eq!(latch.entries(), 1);
    assert!(!latch.is_active());
}

#[test]
fn test_latch_commits_once_per_event() {
    let condition = [false, true, true, true, false, false, true, true, false];
    let mut latch = EdgeLatch::new();
    let mut detector = ThresholdDetector::new();
    for &c in &condition {
        if latch.follow(c) == LatchTransition::Entered {
            detector.detect_flag(true);
        }
    }
    assert_eq!(detector.count(), 2);
    assert_eq!(latch.entries(), 2);
}

// =============================================================================
// DURATION ACCUMULATOR
// =============================================================================

#[test]
fn test_accumulator_yields_run_on_break() {
    let mut acc = DurationAccumulator::new();
    assert_eq!(acc.accumulate(true, 0.5), None);
    assert_eq!(acc.accumulate(true, 0.5), None);
    assert_eq!(acc.accumulate(true, 0.25), None);
    assert!((acc.current() - 1.25).abs() < 1e-12);

    let run = acc.accumulate(false, 0.5).unwrap();
    assert!((run - 1.25).abs() < 1e-12);
    assert_eq!(acc.current(), 0.0);
    assert_eq!(acc.accumulate(false, 0.5), None);

    acc.accumulate(true, 0.1);
    assert!((acc.longest() - 1.25).abs() < 1e-12);
}

#[test]
fn test_accumulated_duration_fed_to_detector() {
    let mut acc = DurationAccumulator::new();
    let mut detector = ThresholdDetector::new();
    // runs of 0.3 s and 1.2 s at 0.1 s ticks
    let pattern = [3, 12];
    for run in pattern {
        for _ in 0..run {
            acc.accumulate(true, 0.1);
        }
        if let Some(duration) = acc.accumulate(false, 0.1) {
            detector.detect(duration, Trigger::above(1.0));
        }
    }
    assert_eq!(detector.calls(), 2);
    assert_eq!(detector.count(), 1);
}

#[test]
fn test_negative_dt_is_ignored() {
    let mut acc = DurationAccumulator::new();
    acc.accumulate(true, -1.0);
    assert_eq!(acc.current(), 0.0);
    assert_eq!(acc.accumulate(false, 0.1), None);
}
