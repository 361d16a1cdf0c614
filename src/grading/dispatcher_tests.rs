//! Tests for the Dispatcher
//!
//! These tests verify:
//! 1. Stop votes are signalled only after every evaluator finished the tick
//! 2. Disabled and invalid KPIs never vote
//! 3. Per-tick events and skips are reported
//! 4. Finish folds verdicts and survives sink failures

use super::clock::NANOS_PER_MILLI;
use super::config::{EvalSettings, KpiDefinition, ThresholdValue};
use super::dispatcher::*;
use super::error::{ReportError, SkipReason};
use super::evaluator::{KpiEvaluator, Lifecycle, Outcome, RuleEvaluator};
use super::kpis::{Collision, MaxSpeed};
use super::registry::KpiRegistry;
use super::report::KpiCase;
use super::sink::{MemorySink, NullSink, ReportSink};
use super::telemetry::{ActorKind, ActorState, NoBus, TickContext};
use super::verdict::{KpiResult, Verdict};
use parking_lot::Mutex;
use std::sync::Arc;

// =============================================================================
// SCRIPTED EVALUATORS
// =============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// Evaluator that records every step and report write in a shared log.
struct Scripted {
    name: String,
    vote_at: Option<u64>,
    log: Log,
    state: Lifecycle,
    last_tick: Option<u64>,
}

impl Scripted {
    fn boxed(name: &str, vote_at: Option<u64>, log: &Log) -> Box<dyn KpiEvaluator> {
        Box::new(Self {
            name: name.to_string(),
            vote_at,
            log: Arc::clone(log),
            state: Lifecycle::Uninitialized,
            last_tick: None,
        })
    }
}

impl KpiEvaluator for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.state
    }

    fn init(&mut self, _def: &KpiDefinition, _settings: &EvalSettings) -> Outcome {
        self.state = Lifecycle::Initialized;
        Outcome::Ok
    }

    fn step(&mut self, tick: &TickContext<'_>) -> Outcome {
        self.state = Lifecycle::Stepping;
        self.last_tick = Some(tick.tick);
        let mut log = self.log.lock();
        log.push(format!("step:{}:{}", self.name, tick.tick));
        log.push(format!("report:{}:{}", self.name, tick.tick));
        Outcome::Ok
    }

    fn stop(&mut self, sink: &mut dyn ReportSink) -> Result<(), ReportError> {
        self.state = Lifecycle::Stopped;
        sink.attach(KpiCase::default())
    }

    fn is_eval_pass(&self) -> KpiResult {
        KpiResult::skipped(&self.name, "scripted")
    }

    fn should_stop_scenario(&self) -> Option<String> {
        match (self.vote_at, self.last_tick) {
            (Some(at), Some(t)) if t >= at => Some("scripted vote".to_string()),
            _ => None,
        }
    }

    fn detected_count(&self) -> u64 {
        0
    }
}

struct LogControl {
    log: Log,
    signals: usize,
}

impl ScenarioControl for LogControl {
    fn request_stop(&mut self, request: &StopRequest) {
        self.signals += 1;
        self.log.lock().push(format!("stop:{}", request.tick));
    }
}

/// Sink that rejects one named case and keeps the rest.
struct PickySink {
    reject: &'static str,
    accepted: Vec<String>,
}

impl ReportSink for PickySink {
    fn attach(&mut self, case: KpiCase) -> Result<(), ReportError> {
        if case.info.name == self.reject {
            return Err(ReportError::Sink(format!("{} rejected", case.info.name)));
        }
        self.accepted.push(case.info.name);
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ego(speed: f64) -> ActorState {
    ActorState::new(0, ActorKind::Ego, 0.0, 0.0).with_speed(speed)
}

fn tick(i: u64, ego: &ActorState) -> TickContext<'_> {
    TickContext::new(i, i as i64 * 10 * NANOS_PER_MILLI, 0.01, &NoBus).with_ego(Some(ego))
}

fn max_speed(name: &str, pass: f64, finish: f64) -> KpiDefinition {
    KpiDefinition::new(name)
        .with_pass_condition(pass)
        .with_finish_condition(finish)
        .with_threshold("Speed_H", ThresholdValue::Number(30.0))
}

fn dispatcher_with(defs: Vec<KpiDefinition>) -> Dispatcher {
    let mut registry = KpiRegistry::new();
    for def in defs {
        registry
            .register(def, Box::new(RuleEvaluator::<MaxSpeed>::new()))
            .unwrap();
    }
    Dispatcher::new(registry, EvalSettings::default())
}

// =============================================================================
// STOP ORDERING
// =============================================================================

#[test]
fn test_stop_signalled_after_full_tick() {
    const N: usize = 5;
    const T: u64 = 2;
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = KpiRegistry::new();
    for i in 0..N {
        let name = format!("kpi{}", i + 1);
        let vote_at = if i == 2 { Some(T) } else { None };
        registry
            .register(KpiDefinition::new(&name), Scripted::boxed(&name, vote_at, &log))
            .unwrap();
    }
    let mut dispatcher = Dispatcher::new(registry, EvalSettings::default());
    assert!(dispatcher.init_all().all_ok());

    let mut control = LogControl {
        log: Arc::clone(&log),
        signals: 0,
    };
    let e = ego(0.0);
    let mut outcomes = Vec::new();
    for i in 0..=T + 1 {
        outcomes.push(dispatcher.step(&tick(i, &e), &mut control));
    }

    assert!(!outcomes[T as usize - 1].stop_requested());
    let request = outcomes[T as usize].stop.as_ref().unwrap();
    assert_eq!(request.tick, T);
    assert_eq!(request.voters.len(), 1);
    assert_eq!(request.voters[0].kpi, "kpi3");

    let entries = log.lock().clone();
    let stop_pos = entries.iter().position(|e| e == &format!("stop:{}", T)).unwrap();
    for n in 1..=N {
        for kind in ["step", "report"] {
            let entry = format!("{}:kpi{}:{}", kind, n, T);
            let pos = entries.iter().position(|e| *e == entry).unwrap();
            assert!(pos < stop_pos, "{} logged after stop", entry);
        }
    }
    // nothing of the next tick leaks in before the signal
    assert!(entries[..stop_pos].iter().all(|e| !e.ends_with(&format!(":{}", T + 1))));

    // the vote persists but the orchestrator is signalled once
    assert!(outcomes[T as usize + 1].stop_requested());
    assert_eq!(control.signals, 1);
    assert_eq!(dispatcher.stop_request().map(|r| r.tick), Some(T));
}

#[test]
fn test_stop_flag_keeps_first_request() {
    let mut flag = StopFlag::new();
    assert!(!flag.is_set());
    let first = StopRequest {
        tick: 3,
        time: 30 * NANOS_PER_MILLI,
        voters: vec![
            StopVote {
                kpi: "Collision".to_string(),
                reason: "collision".to_string(),
            },
            StopVote {
                kpi: "MaxSpeed".to_string(),
                reason: "over max speed".to_string(),
            },
        ],
    };
    flag.request_stop(&first);
    flag.request_stop(&StopRequest {
        tick: 4,
        ..first.clone()
    });
    assert_eq!(flag.request().map(|r| r.tick), Some(3));
    assert_eq!(first.reason(), "Collision: collision;MaxSpeed: over max speed");
}

// =============================================================================
// VOTES, EVENTS, SKIPS
// =============================================================================

#[test]
fn test_disabled_and_invalid_never_vote() {
    let mut registry = KpiRegistry::new();
    registry
        .register(max_speed("Disabled", 1.0, 1.0).disabled(), Box::new(RuleEvaluator::<MaxSpeed>::new()))
        .unwrap();
    registry
        .register(
            KpiDefinition::new("Invalid").with_finish_condition(1.0),
            Box::new(RuleEvaluator::<MaxSpeed>::new()),
        )
        .unwrap();
    let mut dispatcher = Dispatcher::new(registry, EvalSettings::default());
    let init = dispatcher.init_all();
    assert_eq!(init.skipped.len(), 1);
    assert_eq!(init.rejected.len(), 1);
    assert!(init.initialized.is_empty());

    let mut flag = StopFlag::new();
    let e = ego(100.0);
    for i in 0..10 {
        let outcome = dispatcher.step(&tick(i, &e), &mut flag);
        assert_eq!(outcome.stepped, 0);
        assert_eq!(outcome.skipped.len(), 2);
        assert!(outcome.stop.is_none());
    }
    assert!(!flag.is_set());

    let verdict = dispatcher.finish(&mut NullSink);
    assert!(verdict.passed);
    assert_eq!(verdict.summary.skipped, 2);
}

#[test]
fn test_tick_outcome_reports_events_and_skips() {
    let mut dispatcher = dispatcher_with(vec![max_speed("Fast", 1.0, 0.0), max_speed("Other", 1.0, 0.0)]);
    dispatcher.init_all();
    let mut flag = StopFlag::new();

    let slow = ego(10.0);
    let outcome = dispatcher.step(&tick(0, &slow), &mut flag);
    assert_eq!(outcome.stepped, 2);
    assert!(outcome.events.is_empty());

    let fast = ego(40.0);
    let outcome = dispatcher.step(&tick(1, &fast), &mut flag);
    assert_eq!(outcome.events, vec!["Fast".to_string(), "Other".to_string()]);

    let missing = TickContext::new(2, 20 * NANOS_PER_MILLI, 0.01, &NoBus);
    let outcome = dispatcher.step(&missing, &mut flag);
    assert_eq!(outcome.stepped, 0);
    assert!(outcome
        .skipped
        .iter()
        .all(|(_, r)| matches!(r, SkipReason::MissingTelemetry(_))));
    assert_eq!(dispatcher.ticks(), 3);
}

#[test]
fn test_vote_reason_names_kpi() {
    let mut dispatcher = dispatcher_with(vec![max_speed("Speeding", 0.0, 2.0)]);
    dispatcher.init_all();
    let mut flag = StopFlag::new();
    let fast = ego(40.0);
    dispatcher.step(&tick(0, &fast), &mut flag);
    assert!(!flag.is_set());
    dispatcher.step(&tick(1, &fast), &mut flag);
    assert_eq!(
        flag.request().map(|r| r.reason()),
        Some("Speeding: over max speed".to_string())
    );
}

// =============================================================================
// FINISH
// =============================================================================

#[test]
fn test_finish_aggregates_results() {
    let mut registry = KpiRegistry::new();
    registry
        .register(max_speed("MaxSpeed", 1.0, 0.0), Box::new(RuleEvaluator::<MaxSpeed>::new()))
        .unwrap();
    registry
        .register(
            KpiDefinition::new("Collision").with_pass_condition(1.0),
            Box::new(RuleEvaluator::<Collision>::new()),
        )
        .unwrap();
    let mut dispatcher = Dispatcher::new(registry, EvalSettings::default());
    dispatcher.init_all();

    let mut flag = StopFlag::new();
    let fast = ego(35.0);
    dispatcher.step(&tick(0, &fast), &mut flag);

    let mut sink = MemorySink::new();
    let verdict = dispatcher.finish(&mut sink);
    assert!(!verdict.passed);
    assert_eq!(verdict.reason, "over max speed");
    assert_eq!(verdict.summary.total, 2);
    assert_eq!(verdict.summary.failed, 1);
    assert_eq!(verdict.summary.passed, 1);
    assert_eq!(verdict.result("Collision").map(|r| r.verdict), Some(Verdict::Pass));
    assert_eq!(sink.len(), 2);

    // a second finish does not stop evaluators again
    let again = dispatcher.finish(&mut sink);
    assert_eq!(sink.len(), 2);
    assert_eq!(again.results, verdict.results);
}

#[test]
fn test_sink_failure_does_not_stop_others() {
    let mut dispatcher = dispatcher_with(vec![
        max_speed("First", 1.0, 0.0),
        max_speed("Second", 1.0, 0.0),
        max_speed("Third", 1.0, 0.0),
    ]);
    dispatcher.init_all();
    let mut flag = StopFlag::new();
    let e = ego(10.0);
    dispatcher.step(&tick(0, &e), &mut flag);

    let mut sink = PickySink {
        reject: "Second",
        accepted: Vec::new(),
    };
    let verdict = dispatcher.finish(&mut sink);
    assert_eq!(sink.accepted, vec!["First".to_string(), "Third".to_string()]);
    assert!(verdict.passed);
    assert!(dispatcher
        .registry()
        .entries()
        .iter()
        .all(|e| e.evaluator.lifecycle() == Lifecycle::Stopped));
}
