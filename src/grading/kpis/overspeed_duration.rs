//! Sustained speeding against the lane speed limit.
//!
//! Time above the limit is integrated tick by tick. A run is committed to the
//! detector once, on the tick its length reaches `Duration_H`, so a run still
//! open when the scenario stops is counted and can vote to stop it.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{DurationAccumulator, ThresholdDetector, Trigger};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, Sample, ThresholdOverlay, XYPlot, YAxis};
use crate::grading::telemetry::{TickContext, MIN_VALID_SPEED_LIMIT};

pub struct OverSpeedDuration {
    tolerance: f64,
    duration_limit: f64,
    default_limit: f64,
    accumulator: DurationAccumulator,
    detector: ThresholdDetector,
    /// The run in progress has already been counted.
    run_committed: bool,
    fired: bool,
    plot: PlotId,
}

impl OverSpeedDuration {
    /// Speed allowed before accumulation starts.
    pub fn allowed_speed(&self, map_limit: Option<f64>) -> f64 {
        let limit = map_limit
            .filter(|v| *v > MIN_VALID_SPEED_LIMIT)
            .unwrap_or(self.default_limit);
        limit * (1.0 + self.tolerance)
    }

    /// Length of the speeding run in progress (s).
    pub fn pending(&self) -> f64 {
        self.accumulator.current()
    }
}

impl KpiRule for OverSpeedDuration {
    const NAME: &'static str = "OverSpeedDuration";

    fn configure(
        def: &KpiDefinition,
        settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let duration_limit = def.threshold_or("Duration_H", 1.0)?;
        let plot = report.add_plot(
            XYPlot::over_time("over speed duration")
                .with_y(
                    YAxis::new("speed", "m/s")
                        .with_upper(ThresholdOverlay::per_sample("speed limit")),
                )
                .with_y(
                    YAxis::new("over speed duration", "s")
                        .with_upper(ThresholdOverlay::constant("duration limit", duration_limit)),
                ),
        );
        Ok(Self {
            tolerance: def.threshold_or("SpeedTolerance", 0.0)?,
            duration_limit,
            default_limit: settings.default_speed_limit_mps,
            accumulator: DurationAccumulator::new(),
            detector: ThresholdDetector::new(),
            run_committed: false,
            fired: false,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let ego = tick.ego()?;
        let allowed = self.allowed_speed(tick.map().and_then(|m| m.speed_limit_mps));
        let over = ego.speed > allowed;
        self.fired = false;
        if self.accumulator.accumulate(over, tick.dt_s).is_some() {
            self.run_committed = false;
        } else if over && !self.run_committed {
            let trigger = Trigger::above(self.duration_limit);
            if trigger.is_triggered(self.accumulator.current()) {
                self.fired = self.detector.detect(self.accumulator.current(), trigger);
                self.run_committed = true;
            }
        }
        report.push(
            self.plot,
            tick.time_s(),
            &[
                Sample::new(ego.speed).upper(Some(allowed)),
                Sample::new(self.accumulator.current()),
            ],
        )?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        report.add_pair(
            "longest over speed",
            format!("{:.2} s", self.accumulator.longest()),
        );
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.fired
    }

    fn fail_reason(&self) -> String {
        "over speed for too long".to_string()
    }
}
