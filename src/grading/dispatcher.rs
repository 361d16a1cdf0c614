//! Tick Dispatcher
//!
//! Drives every registered evaluator through its lifecycle, sequentially and
//! in registration order.
//!
//! Per tick:
//! 1. `step` every evaluator (skips are tick-local and never escalate)
//! 2. collect stop votes from every evaluator
//! 3. if any voted, signal the [`ScenarioControl`]
//!
//! Stop is advisory: the signal is raised only after step 1 finished for the
//! whole set, so no evaluator is cut off mid-tick.

use crate::grading::clock::Nanos;
use crate::grading::config::EvalSettings;
use crate::grading::error::{ConfigError, SkipReason};
use crate::grading::evaluator::Outcome;
use crate::grading::registry::KpiRegistry;
use crate::grading::sink::ReportSink;
use crate::grading::telemetry::TickContext;
use crate::grading::verdict::{KpiResult, ScenarioVerdict, VerdictAggregator};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// =============================================================================
// STOP SIGNAL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopVote {
    pub kpi: String,
    pub reason: String,
}

/// Raised after a tick in which at least one KPI voted to stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRequest {
    pub tick: u64,
    pub time: Nanos,
    pub voters: Vec<StopVote>,
}

impl StopRequest {
    /// `"kpi: reason"` per voter, joined with ';'.
    pub fn reason(&self) -> String {
        self.voters
            .iter()
            .map(|v| format!("{}: {}", v.kpi, v.reason))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// The orchestrator side of early termination.
pub trait ScenarioControl {
    fn request_stop(&mut self, request: &StopRequest);
}

/// Records the first request; used by the replay driver.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    request: Option<StopRequest>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.request.is_some()
    }

    pub fn request(&self) -> Option<&StopRequest> {
        self.request.as_ref()
    }
}

impl ScenarioControl for StopFlag {
    fn request_stop(&mut self, request: &StopRequest) {
        self.request.get_or_insert_with(|| request.clone());
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of `init_all`.
#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub initialized: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub rejected: Vec<(String, ConfigError)>,
}

impl InitReport {
    pub fn all_ok(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub tick: u64,
    /// Evaluators whose step returned Ok.
    pub stepped: usize,
    pub skipped: Vec<(String, SkipReason)>,
    /// Evaluators whose primary detector fired on this tick.
    pub events: Vec<String>,
    pub stop: Option<StopRequest>,
}

impl TickOutcome {
    pub fn stop_requested(&self) -> bool {
        self.stop.is_some()
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

pub struct Dispatcher {
    registry: KpiRegistry,
    settings: EvalSettings,
    ticks: u64,
    stop: Option<StopRequest>,
    finished: bool,
}

impl Dispatcher {
    pub fn new(registry: KpiRegistry, settings: EvalSettings) -> Self {
        Self {
            registry,
            settings,
            ticks: 0,
            stop: None,
            finished: false,
        }
    }

    pub fn registry(&self) -> &KpiRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    /// Ticks dispatched so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// First stop request raised during the run.
    pub fn stop_request(&self) -> Option<&StopRequest> {
        self.stop.as_ref()
    }

    /// Initialize every evaluator with its definition. Rejections leave the
    /// evaluator SKIPPED for the run; they never abort the set.
    pub fn init_all(&mut self) -> InitReport {
        let mut report = InitReport::default();
        for entry in self.registry.entries_mut() {
            let name = entry.definition.name.clone();
            match entry.evaluator.init(&entry.definition, &self.settings) {
                Outcome::Ok => report.initialized.push(name),
                Outcome::Skip(reason) => report.skipped.push((name, reason)),
                Outcome::ConfigError(err) => report.rejected.push((name, err)),
            }
        }
        info!(
            initialized = report.initialized.len(),
            skipped = report.skipped.len(),
            rejected = report.rejected.len(),
            "kpi set initialized"
        );
        report
    }

    /// Step every evaluator on `tick`, then collect votes.
    pub fn step(&mut self, tick: &TickContext<'_>, control: &mut dyn ScenarioControl) -> TickOutcome {
        let mut outcome = TickOutcome {
            tick: tick.tick,
            ..TickOutcome::default()
        };

        for entry in self.registry.entries_mut() {
            match entry.evaluator.step(tick) {
                Outcome::Ok => {
                    outcome.stepped += 1;
                    if entry.evaluator.event_detected() {
                        debug!(kpi = %entry.definition.name, tick = tick.tick, "event detected");
                        outcome.events.push(entry.definition.name.clone());
                    }
                }
                Outcome::Skip(reason) => {
                    outcome.skipped.push((entry.definition.name.clone(), reason));
                }
                Outcome::ConfigError(err) => {
                    warn!(kpi = %entry.definition.name, error = %err, "unexpected config error on step");
                }
            }
        }
        self.ticks += 1;

        let voters: Vec<StopVote> = self
            .registry
            .entries()
            .iter()
            .filter_map(|entry| {
                entry.evaluator.should_stop_scenario().map(|reason| StopVote {
                    kpi: entry.definition.name.clone(),
                    reason,
                })
            })
            .collect();

        if !voters.is_empty() {
            let request = StopRequest {
                tick: tick.tick,
                time: tick.time,
                voters,
            };
            if self.stop.is_none() {
                info!(tick = tick.tick, reason = %request.reason(), "scenario stop requested");
                control.request_stop(&request);
                self.stop = Some(request.clone());
            }
            outcome.stop = Some(request);
        }
        outcome
    }

    /// Per-KPI results from current state.
    pub fn results(&self) -> Vec<KpiResult> {
        self.registry
            .entries()
            .iter()
            .map(|entry| entry.evaluator.is_eval_pass())
            .collect()
    }

    /// Stop every evaluator into `sink` and fold the verdicts. A failing sink
    /// write is logged and does not stop the remaining evaluators.
    pub fn finish(&mut self, sink: &mut dyn ReportSink) -> ScenarioVerdict {
        if !self.finished {
            for entry in self.registry.entries_mut() {
                if let Err(err) = entry.evaluator.stop(sink) {
                    error!(kpi = %entry.definition.name, error = %err, "report sink write failed");
                }
            }
            self.finished = true;
        }

        let verdict = VerdictAggregator::aggregate(self.results());
        info!(
            passed = verdict.passed,
            total = verdict.summary.total,
            failed = verdict.summary.failed,
            skipped = verdict.summary.skipped,
            ticks = self.ticks,
            "scenario evaluated"
        );
        verdict
    }
}
