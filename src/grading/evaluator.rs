//! KPI Evaluator
//!
//! The uniform lifecycle every KPI implements, plus the shared skeleton that
//! lets a concrete rule supply only its domain signal.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──step──▶ Stepping ──stop──▶ Stopped
//!                                                  │  ▲
//!                                                  └──┘ step
//! ```
//!
//! Strictly linear: a second `init` is rejected, `step` outside
//! Initialized/Stepping is a skip, `stop` is idempotent.
//!
//! # Implementing a Rule
//!
//! ```ignore
//! pub struct MaxSpeed { detector: ThresholdDetector, /* ... */ }
//!
//! impl KpiRule for MaxSpeed {
//!     const NAME: &'static str = "MaxSpeed";
//!     fn configure(def, settings, report) -> Result<Self, ConfigError> { ... }
//!     fn evaluate(&mut self, tick, report) -> Result<(), StepError> { ... }
//!     fn detected_count(&self) -> u64 { self.detector.count() }
//!     fn fail_reason(&self) -> String { "over max speed".into() }
//! }
//!
//! let evaluator: Box<dyn KpiEvaluator> = Box::new(RuleEvaluator::<MaxSpeed>::new());
//! ```

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::error::{ConfigError, ReportError, SkipReason, StepError};
use crate::grading::report::{CaseInfo, KpiCase, ReportBuilder};
use crate::grading::sink::ReportSink;
use crate::grading::telemetry::TickContext;
use crate::grading::verdict::{stop_condition_met, KpiResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// =============================================================================
// LIFECYCLE TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Stepping,
    Stopped,
}

/// Result of `init` and `step`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Skip(SkipReason),
    ConfigError(ConfigError),
}

impl Outcome {
    /// Boolean view used by simple callers.
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Outcome::Skip(reason) => Some(reason),
            _ => None,
        }
    }
}

// =============================================================================
// EVALUATOR TRAIT
// =============================================================================

/// Lifecycle driven by the dispatcher. Implementations own all of their
/// detector and report state; nothing is shared between evaluators.
pub trait KpiEvaluator: Send {
    /// Unique name within a run.
    fn name(&self) -> &str;

    fn lifecycle(&self) -> Lifecycle;

    /// Bind configuration and build fresh detector/report state.
    fn init(&mut self, def: &KpiDefinition, settings: &EvalSettings) -> Outcome;

    /// Advance on one tick. Skips leave detector state untouched; a skip for
    /// missing telemetry appends a gap sample so plots stay one sample per tick.
    fn step(&mut self, tick: &TickContext<'_>) -> Outcome;

    /// Finalize artifacts and hand the case to `sink`. Fails only when the
    /// sink write fails.
    fn stop(&mut self, sink: &mut dyn ReportSink) -> Result<(), ReportError>;

    /// Verdict from current state. Pure.
    fn is_eval_pass(&self) -> KpiResult;

    /// `Some(reason)` when this KPI votes to end the scenario.
    fn should_stop_scenario(&self) -> Option<String>;

    /// Cumulative detected events.
    fn detected_count(&self) -> u64;

    /// Whether the primary detector fired on the last step.
    fn event_detected(&self) -> bool {
        false
    }
}

// =============================================================================
// RULE TRAIT
// =============================================================================

/// Domain part of a KPI: what to read from the tick and what to detect.
pub trait KpiRule: Sized + Send {
    /// Name used in configuration and the factory.
    const NAME: &'static str;

    /// Read thresholds, lay out report artifacts, start with fresh detectors.
    fn configure(
        def: &KpiDefinition,
        settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError>;

    /// Compute the signal for one tick. Return a skip before mutating anything.
    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError>;

    /// Derived summaries over the collected series.
    fn finalize(&mut self, _report: &mut ReportBuilder) {}

    fn detected_count(&self) -> u64;

    fn latest_event(&self) -> bool {
        false
    }

    fn fail_reason(&self) -> String;

    fn pass_reason(&self) -> String {
        format!("{} check pass", Self::NAME)
    }

    /// Reason attached to a stop vote.
    fn stop_reason(&self) -> String {
        self.fail_reason()
    }
}

// =============================================================================
// RULE EVALUATOR
// =============================================================================

/// Shared lifecycle skeleton around one [`KpiRule`].
pub struct RuleEvaluator<R: KpiRule> {
    state: Lifecycle,
    definition: Option<KpiDefinition>,
    rule: Option<R>,
    report: ReportBuilder,
    init_error: Option<ConfigError>,
    steps: u64,
    skips: u64,
}

impl<R: KpiRule> RuleEvaluator<R> {
    pub fn new() -> Self {
        info!(kpi = R::NAME, "eval algorithm constructed");
        Self {
            state: Lifecycle::Uninitialized,
            definition: None,
            rule: None,
            report: ReportBuilder::default(),
            init_error: None,
            steps: 0,
            skips: 0,
        }
    }

    /// The configured rule, once Init succeeded.
    pub fn rule(&self) -> Option<&R> {
        self.rule.as_ref()
    }

    pub fn report(&self) -> &ReportBuilder {
        &self.report
    }

    pub fn definition(&self) -> Option<&KpiDefinition> {
        self.definition.as_ref()
    }

    /// Successful steps so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Skipped steps so far.
    pub fn skips(&self) -> u64 {
        self.skips
    }

    fn enabled(&self) -> bool {
        self.definition.as_ref().map(|d| d.enabled).unwrap_or(false)
    }
}

impl<R: KpiRule> Default for RuleEvaluator<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: KpiRule> KpiEvaluator for RuleEvaluator<R> {
    fn name(&self) -> &str {
        self.definition
            .as_ref()
            .map(|d| d.name.as_str())
            .unwrap_or(R::NAME)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.state
    }

    fn init(&mut self, def: &KpiDefinition, settings: &EvalSettings) -> Outcome {
        if self.state != Lifecycle::Uninitialized {
            warn!(kpi = %def.name, state = ?self.state, "re-initialization rejected");
            return Outcome::ConfigError(ConfigError::AlreadyInitialized(def.name.clone()));
        }
        self.state = Lifecycle::Initialized;
        self.definition = Some(def.clone());
        self.report = ReportBuilder::new(settings.report_enabled);

        if !def.enabled {
            debug!(kpi = %def.name, "kpi disabled");
            return Outcome::Skip(SkipReason::Disabled);
        }

        if let Some(map) = &def.score_map {
            if let Err(detail) = map.validate() {
                let err = ConfigError::InvalidScoreMap {
                    kpi: def.name.clone(),
                    detail,
                };
                warn!(kpi = %def.name, error = %err, "kpi configuration rejected");
                self.init_error = Some(err.clone());
                return Outcome::ConfigError(err);
            }
        }

        match R::configure(def, settings, &mut self.report) {
            Ok(rule) => {
                info!(
                    kpi = %def.name,
                    pass_condition = def.pass_condition,
                    finish_condition = def.finish_condition,
                    thresholds = %def.threshold_info(),
                    "kpi initialized"
                );
                self.rule = Some(rule);
                Outcome::Ok
            }
            Err(err) => {
                warn!(kpi = %def.name, error = %err, "kpi configuration rejected");
                self.init_error = Some(err.clone());
                Outcome::ConfigError(err)
            }
        }
    }

    fn step(&mut self, tick: &TickContext<'_>) -> Outcome {
        if !matches!(self.state, Lifecycle::Initialized | Lifecycle::Stepping) {
            return Outcome::Skip(SkipReason::NotStepping);
        }
        if !self.enabled() {
            return Outcome::Skip(SkipReason::Disabled);
        }
        let Some(rule) = self.rule.as_mut() else {
            return Outcome::Skip(SkipReason::ModuleInvalid);
        };

        self.state = Lifecycle::Stepping;
        match rule.evaluate(tick, &mut self.report) {
            Ok(()) => {
                self.steps += 1;
                Outcome::Ok
            }
            Err(StepError::Skip(reason)) => {
                debug!(kpi = R::NAME, tick = tick.tick, %reason, "step skipped");
                if reason.is_transient() {
                    self.report.push_gap(tick.time_s());
                }
                self.skips += 1;
                Outcome::Skip(reason)
            }
            Err(StepError::Report(err)) => {
                error!(kpi = R::NAME, tick = tick.tick, error = %err, "report write failed");
                self.steps += 1;
                Outcome::Ok
            }
        }
    }

    fn stop(&mut self, sink: &mut dyn ReportSink) -> Result<(), ReportError> {
        if matches!(self.state, Lifecycle::Uninitialized | Lifecycle::Stopped) {
            return Ok(());
        }
        let request_stop = self.should_stop_scenario().is_some();
        self.state = Lifecycle::Stopped;

        let Some(def) = self.definition.as_ref() else {
            return Ok(());
        };
        if let Some(rule) = self.rule.as_mut() {
            rule.finalize(&mut self.report);
        }
        let report = std::mem::take(&mut self.report);
        let attachments = report.finalize().unwrap_or_else(|err| {
            error!(kpi = %def.name, error = %err, "dropping misaligned report artifacts");
            Vec::new()
        });

        let case = KpiCase {
            info: CaseInfo::from_definition(def),
            result: None,
            request_stop,
            attachments,
        };
        debug!(
            kpi = %def.name,
            steps = self.steps,
            skips = self.skips,
            detected = self.detected_count(),
            "kpi stopped"
        );
        sink.attach(case)
    }

    fn is_eval_pass(&self) -> KpiResult {
        let Some(def) = self.definition.as_ref() else {
            return KpiResult::skipped(R::NAME, format!("{} not initialized", R::NAME));
        };
        if !def.enabled {
            return KpiResult::skipped(&def.name, format!("{} check skipped", def.name));
        }
        match self.rule.as_ref() {
            Some(rule) => KpiResult::judge(
                def,
                rule.detected_count(),
                &rule.fail_reason(),
                &rule.pass_reason(),
            ),
            None => {
                let detail = self
                    .init_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "module invalid".to_string());
                KpiResult::skipped(&def.name, detail)
            }
        }
    }

    fn should_stop_scenario(&self) -> Option<String> {
        let def = self.definition.as_ref().filter(|d| d.enabled)?;
        let rule = self.rule.as_ref()?;
        stop_condition_met(rule.detected_count(), def.finish_condition).then(|| rule.stop_reason())
    }

    fn detected_count(&self) -> u64 {
        self.rule.as_ref().map(R::detected_count).unwrap_or(0)
    }

    fn event_detected(&self) -> bool {
        self.rule.as_ref().map(R::latest_event).unwrap_or(false)
    }
}
