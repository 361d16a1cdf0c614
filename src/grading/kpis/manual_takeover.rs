//! Driver takeovers reported on the chassis topic.
//!
//! Usually configured with the `"<"` relation: the scenario requires the driver
//! to intervene, so too few takeovers is the failure.

use crate::grading::config::{EvalSettings, KpiDefinition, PassRelation};
use crate::grading::detector::{EdgeLatch, LatchTransition, ThresholdDetector};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, XYPlot, YAxis};
use crate::grading::telemetry::{topics, TickContext};
use serde::{Deserialize, Serialize};

/// `CHASSIS` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisSignals {
    #[serde(default)]
    pub takeover: bool,
    #[serde(default)]
    pub steering_override: bool,
    #[serde(default)]
    pub brake_override: bool,
}

impl ChassisSignals {
    pub fn driver_active(&self) -> bool {
        self.takeover || self.steering_override || self.brake_override
    }
}

pub struct ManualTakeover {
    relation: PassRelation,
    latch: EdgeLatch,
    detector: ThresholdDetector,
    fired: bool,
    plot: PlotId,
}

impl ManualTakeover {
    /// One detect per rising edge of driver activity.
    pub fn observe(&mut self, signals: &ChassisSignals) -> LatchTransition {
        let transition = self.latch.follow(signals.driver_active());
        self.fired = transition == LatchTransition::Entered && self.detector.detect_flag(true);
        transition
    }
}

impl KpiRule for ManualTakeover {
    const NAME: &'static str = "ManualTakeover";

    fn configure(
        def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let plot = report.add_plot(
            XYPlot::over_time("manual takeover").with_y(YAxis::new("driver active", "")),
        );
        Ok(Self {
            relation: def.pass_relation,
            latch: EdgeLatch::new(),
            detector: ThresholdDetector::new(),
            fired: false,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let signals: ChassisSignals = tick.decode(topics::CHASSIS)?;
        let transition = self.observe(&signals);
        let active = if transition.is_active() { 1.0 } else { 0.0 };
        report.push_values(self.plot, tick.time_s(), &[active])?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        report.add_pair("takeovers", self.detector.count().to_string());
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.fired
    }

    fn fail_reason(&self) -> String {
        match self.relation {
            PassRelation::Fewer => "too few manual takeovers".to_string(),
            PassRelation::AtLeast => "manual takeover".to_string(),
        }
    }

    fn stop_reason(&self) -> String {
        "manual takeover".to_string()
    }
}
