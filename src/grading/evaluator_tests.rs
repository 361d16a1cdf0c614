//! Tests for the KPI Evaluator lifecycle
//!
//! These tests verify:
//! 1. Strictly linear lifecycle (no re-init, skips outside stepping)
//! 2. Disabled and invalid KPIs never mutate state and report SKIPPED
//! 3. Pass/finish condition semantics including the 0.5 guard
//! 4. Tick-local skips and report alignment

use super::clock::NANOS_PER_MILLI;
use super::config::{EvalSettings, KpiDefinition, PassRelation, ThresholdValue};
use super::error::{ConfigError, ReportError, SkipReason};
use super::evaluator::*;
use super::kpis::{ManualTakeover, MaxSpeed};
use super::report::{Attachment, KpiCase};
use super::sink::{MemorySink, ReportSink};
use super::telemetry::{topics, ActorKind, ActorState, MessageBuffer, MessageBus, NoBus, TickContext};
use super::verdict::{ScoreMap1D, Verdict};

// =============================================================================
// HELPERS
// =============================================================================

fn ego(speed: f64) -> ActorState {
    ActorState::new(0, ActorKind::Ego, 0.0, 0.0).with_speed(speed)
}

fn tick<'a>(i: u64, ego: Option<&'a ActorState>, bus: &'a dyn MessageBus) -> TickContext<'a> {
    TickContext::new(i, i as i64 * 10 * NANOS_PER_MILLI, 0.01, bus).with_ego(ego)
}

fn max_speed_def(limit: f64, pass: f64) -> KpiDefinition {
    KpiDefinition::new("MaxSpeed")
        .with_pass_condition(pass)
        .with_threshold("Speed_H", ThresholdValue::Number(limit))
}

fn run_speeds(evaluator: &mut RuleEvaluator<MaxSpeed>, speeds: &[f64]) -> Vec<Outcome> {
    speeds
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let actor = ego(v);
            evaluator.step(&tick(i as u64, Some(&actor), &NoBus))
        })
        .collect()
}

struct FailingSink;

impl ReportSink for FailingSink {
    fn attach(&mut self, _case: KpiCase) -> Result<(), ReportError> {
        Err(ReportError::Sink("disk full".to_string()))
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_lifecycle_is_linear() {
    let settings = EvalSettings::default();
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    assert_eq!(evaluator.lifecycle(), Lifecycle::Uninitialized);

    let actor = ego(10.0);
    assert_eq!(
        evaluator.step(&tick(0, Some(&actor), &NoBus)),
        Outcome::Skip(SkipReason::NotStepping)
    );

    assert_eq!(evaluator.init(&max_speed_def(30.0, 1.0), &settings), Outcome::Ok);
    assert_eq!(evaluator.lifecycle(), Lifecycle::Initialized);

    assert!(evaluator.step(&tick(0, Some(&actor), &NoBus)).is_ok());
    assert_eq!(evaluator.lifecycle(), Lifecycle::Stepping);

    match evaluator.init(&max_speed_def(30.0, 1.0), &settings) {
        Outcome::ConfigError(ConfigError::AlreadyInitialized(name)) => assert_eq!(name, "MaxSpeed"),
        other => panic!("expected re-init rejection, got {:?}", other),
    }
    assert_eq!(evaluator.lifecycle(), Lifecycle::Stepping);

    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();
    assert_eq!(evaluator.lifecycle(), Lifecycle::Stopped);
    assert_eq!(
        evaluator.step(&tick(1, Some(&actor), &NoBus)),
        Outcome::Skip(SkipReason::NotStepping)
    );

    // stop is idempotent
    evaluator.stop(&mut sink).unwrap();
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_stop_before_init_attaches_nothing() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();
    assert!(sink.is_empty());
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Skipped);
}

// =============================================================================
// DISABLED AND INVALID
// =============================================================================

#[test]
fn test_disabled_kpi_never_advances() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    let outcome = evaluator.init(&max_speed_def(30.0, 1.0).with_finish_condition(1.0).disabled(), &EvalSettings::default());
    assert_eq!(outcome, Outcome::Skip(SkipReason::Disabled));

    let outcomes = run_speeds(&mut evaluator, &[50.0, 60.0, 70.0]);
    assert!(outcomes.iter().all(|o| *o == Outcome::Skip(SkipReason::Disabled)));
    assert_eq!(evaluator.detected_count(), 0);
    assert_eq!(evaluator.steps(), 0);
    assert!(evaluator.rule().is_none());
    assert!(evaluator.should_stop_scenario().is_none());
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Skipped);

    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();
    assert!(sink.cases()[0].attachments.is_empty());
}

#[test]
fn test_missing_threshold_is_skipped_for_run() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    let def = KpiDefinition::new("MaxSpeed").with_pass_condition(1.0).with_finish_condition(1.0);
    match evaluator.init(&def, &EvalSettings::default()) {
        Outcome::ConfigError(ConfigError::MissingThreshold { key, .. }) => assert_eq!(key, "Speed_H"),
        other => panic!("expected missing threshold, got {:?}", other),
    }

    let outcomes = run_speeds(&mut evaluator, &[50.0, 60.0]);
    assert!(outcomes.iter().all(|o| *o == Outcome::Skip(SkipReason::ModuleInvalid)));
    assert!(evaluator.should_stop_scenario().is_none());

    let result = evaluator.is_eval_pass();
    assert_eq!(result.verdict, Verdict::Skipped);
    assert!(result.reason.contains("Speed_H"));
}

#[test]
fn test_malformed_threshold_rejected() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    let def = KpiDefinition::new("MaxSpeed")
        .with_threshold("Speed_H", ThresholdValue::Text("fast".to_string()));
    assert!(matches!(
        evaluator.init(&def, &EvalSettings::default()),
        Outcome::ConfigError(ConfigError::MalformedThreshold { .. })
    ));
}

#[test]
fn test_invalid_score_map_rejected() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    let mut def = max_speed_def(30.0, 1.0);
    def.score_map = Some(ScoreMap1D::new(vec![0.0, 0.0], vec![100.0, 0.0]));
    assert!(matches!(
        evaluator.init(&def, &EvalSettings::default()),
        Outcome::ConfigError(ConfigError::InvalidScoreMap { .. })
    ));
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Skipped);
}

// =============================================================================
// VERDICTS
// =============================================================================

#[test]
fn test_max_speed_sequence_fails_at_two() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 2.0), &EvalSettings::default());
    run_speeds(&mut evaluator, &[10.0, 20.0, 35.0, 40.0, 25.0]);

    assert_eq!(evaluator.detected_count(), 2);
    let result = evaluator.is_eval_pass();
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.reason, "over max speed");
    assert_eq!(result.detected_count, 2);
}

#[test]
fn test_pass_condition_zero_never_fails() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 0.0), &EvalSettings::default());
    run_speeds(&mut evaluator, &[50.0; 20]);
    assert_eq!(evaluator.detected_count(), 20);
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Pass);
}

#[test]
fn test_guard_below_half() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 0.4), &EvalSettings::default());
    run_speeds(&mut evaluator, &[50.0]);
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Pass);
}

#[test]
fn test_is_eval_pass_idempotent() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 1.0), &EvalSettings::default());
    run_speeds(&mut evaluator, &[10.0, 35.0]);
    let first = evaluator.is_eval_pass();
    for _ in 0..5 {
        assert_eq!(evaluator.is_eval_pass(), first);
    }
    assert_eq!(evaluator.detected_count(), 1);
}

#[test]
fn test_stop_vote_uses_finish_condition() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(
        &max_speed_def(30.0, 0.0).with_finish_condition(2.0),
        &EvalSettings::default(),
    );
    run_speeds(&mut evaluator, &[35.0]);
    assert!(evaluator.should_stop_scenario().is_none());
    run_speeds(&mut evaluator, &[36.0]);
    assert_eq!(evaluator.should_stop_scenario().as_deref(), Some("over max speed"));
    // pass condition 0 keeps the verdict at PASS even though it voted
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Pass);
}

#[test]
fn test_inverted_relation_fails_on_too_few() {
    let def = KpiDefinition::new("ManualTakeover")
        .with_pass_condition(1.0)
        .with_relation(PassRelation::Fewer);

    let mut quiet = RuleEvaluator::<ManualTakeover>::new();
    quiet.init(&def, &EvalSettings::default());
    let mut bus = MessageBuffer::new();
    bus.insert_json(topics::CHASSIS, &serde_json::json!({"takeover": false})).unwrap();
    for i in 0..3 {
        assert!(quiet.step(&tick(i, None, &bus)).is_ok());
    }
    let result = quiet.is_eval_pass();
    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.reason, "too few manual takeovers");

    let mut active = RuleEvaluator::<ManualTakeover>::new();
    active.init(&def, &EvalSettings::default());
    let mut takeover = MessageBuffer::new();
    takeover.insert_json(topics::CHASSIS, &serde_json::json!({"takeover": true})).unwrap();
    active.step(&tick(0, None, &bus));
    active.step(&tick(1, None, &takeover));
    active.step(&tick(2, None, &takeover));
    assert_eq!(active.detected_count(), 1);
    assert_eq!(active.is_eval_pass().verdict, Verdict::Pass);
}

#[test]
fn test_report_only_kpi_is_undefined() {
    let mut def = max_speed_def(30.0, 1.0);
    def.result_check = false;
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&def, &EvalSettings::default());
    run_speeds(&mut evaluator, &[50.0]);
    assert_eq!(evaluator.detected_count(), 1);
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Undefined);
}

#[test]
fn test_score_from_score_map() {
    let mut def = max_speed_def(30.0, 5.0);
    def.score_map = Some(ScoreMap1D::new(vec![0.0, 4.0], vec![100.0, 0.0]));
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&def, &EvalSettings::default());
    run_speeds(&mut evaluator, &[40.0, 40.0, 40.0]);
    let score = evaluator.is_eval_pass().score.unwrap();
    assert!((score - 25.0).abs() < 1e-9);
}

// =============================================================================
// TICK-LOCAL SKIPS AND REPORTS
// =============================================================================

#[test]
fn test_missing_ego_is_tick_local() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 1.0), &EvalSettings::default());
    run_speeds(&mut evaluator, &[35.0]);

    let outcome = evaluator.step(&tick(1, None, &NoBus));
    assert!(matches!(outcome, Outcome::Skip(SkipReason::MissingTelemetry(_))));
    assert_eq!(evaluator.detected_count(), 1);
    assert_eq!(evaluator.skips(), 1);
    assert_eq!(evaluator.lifecycle(), Lifecycle::Stepping);

    // next tick retries normally
    let actor = ego(36.0);
    assert!(evaluator.step(&tick(2, Some(&actor), &NoBus)).is_ok());
    assert_eq!(evaluator.detected_count(), 2);
    assert_eq!(evaluator.steps(), 2);
}

#[test]
fn test_missing_telemetry_appends_gap_sample() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 1.0), &EvalSettings::default());
    let actor = ego(12.0);
    evaluator.step(&tick(0, Some(&actor), &NoBus));
    evaluator.step(&tick(1, None, &NoBus));
    evaluator.step(&tick(2, Some(&actor), &NoBus));

    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();
    // after stop the skip is NotStepping and nothing is written
    assert_eq!(
        evaluator.step(&tick(3, None, &NoBus)),
        Outcome::Skip(SkipReason::NotStepping)
    );

    let case = sink.case("MaxSpeed").unwrap();
    let plot = case.plots().next().unwrap();
    assert_eq!(plot.len(), 3);
    assert_eq!(plot.gap_count(), 1);
    assert!((plot.x_axis.data[1] - 0.01).abs() < 1e-12);
    let speeds = plot.y_series(0).unwrap();
    assert_eq!(speeds[0], 12.0);
    assert!(speeds[1].is_nan());
    assert_eq!(case.pair("mean speed"), Some("12.000 m/s"));
    assert!(plot.validate().is_ok());
}

#[test]
fn test_report_alignment_after_k_steps() {
    const K: usize = 37;
    let speeds: Vec<f64> = (0..K).map(|i| i as f64).collect();
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 1.0), &EvalSettings::default());
    run_speeds(&mut evaluator, &speeds);

    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();
    let case = sink.case("MaxSpeed").unwrap();
    let plots: Vec<_> = case.plots().collect();
    assert_eq!(plots.len(), 1);
    for plot in plots {
        assert_eq!(plot.x_axis.data.len(), K);
        for axis in &plot.y_axes {
            assert_eq!(axis.axis.data.len(), K);
        }
    }
    assert_eq!(case.pair("max speed"), Some("36.000 m/s"));
}

#[test]
fn test_reporting_disabled_drops_artifacts() {
    let settings = EvalSettings {
        report_enabled: false,
        ..EvalSettings::default()
    };
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 1.0), &settings);
    run_speeds(&mut evaluator, &[10.0, 40.0]);
    assert_eq!(evaluator.detected_count(), 1);

    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();
    assert!(sink.cases()[0].attachments.is_empty());
}

#[test]
fn test_case_carries_stop_vote_and_info() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(
        &max_speed_def(30.0, 1.0).with_finish_condition(1.0),
        &EvalSettings::default(),
    );
    run_speeds(&mut evaluator, &[31.0]);
    let mut sink = MemorySink::new();
    evaluator.stop(&mut sink).unwrap();

    let case = &sink.cases()[0];
    assert!(case.request_stop);
    assert_eq!(case.info.threshold_info, "Speed_H:30");
    assert_eq!(case.info.pass_condition, "detected count >= 1");
    assert!(case
        .attachments
        .iter()
        .any(|a| matches!(a, Attachment::Pair(p) if p.key == "mean speed")));
}

#[test]
fn test_sink_failure_surfaces_from_stop() {
    let mut evaluator = RuleEvaluator::<MaxSpeed>::new();
    evaluator.init(&max_speed_def(30.0, 1.0), &EvalSettings::default());
    run_speeds(&mut evaluator, &[10.0]);
    let err = evaluator.stop(&mut FailingSink).unwrap_err();
    assert!(matches!(err, ReportError::Sink(_)));
    assert_eq!(evaluator.lifecycle(), Lifecycle::Stopped);
    // verdict is still available
    assert_eq!(evaluator.is_eval_pass().verdict, Verdict::Pass);
}
