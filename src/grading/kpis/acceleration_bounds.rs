//! Longitudinal acceleration band.
//!
//! Either side of the band may be left unbounded. One event is counted per
//! excursion outside the band, on the tick it begins.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{Bound, EdgeLatch, LatchTransition, ThresholdDetector, Trigger};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, ThresholdOverlay, XYPlot, YAxis};
use crate::grading::telemetry::TickContext;
use tracing::warn;

pub struct AccelerationBounds {
    trigger: Trigger,
    latch: EdgeLatch,
    detector: ThresholdDetector,
    fired: bool,
    plot: PlotId,
}

impl AccelerationBounds {
    pub fn observe(&mut self, acceleration: f64) -> LatchTransition {
        let transition = self.latch.follow(self.trigger.is_triggered(acceleration));
        self.fired = transition == LatchTransition::Entered
            && self.detector.detect(acceleration, self.trigger);
        transition
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }
}

impl KpiRule for AccelerationBounds {
    const NAME: &'static str = "Acceleration";

    fn configure(
        def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let lower = def.bound("Acc_L")?;
        let upper = def.bound("Acc_H")?;
        if let (Bound::At(lo), Bound::At(hi)) = (lower, upper) {
            if lo > hi {
                return Err(ConfigError::MalformedThreshold {
                    kpi: def.name.clone(),
                    key: "Acc_L".to_string(),
                    value: format!("{} > Acc_H {}", lo, hi),
                });
            }
        }
        if lower.is_unbounded() && upper.is_unbounded() {
            warn!(kpi = %def.name, "acceleration band unbounded on both sides");
        }

        let mut axis = YAxis::new("acceleration", "m/s^2");
        if let Bound::At(hi) = upper {
            axis = axis.with_upper(ThresholdOverlay::constant("max acceleration", hi));
        }
        if let Bound::At(lo) = lower {
            axis = axis.with_lower(ThresholdOverlay::constant("max deceleration", lo));
        }
        let plot = report.add_plot(XYPlot::over_time("acceleration").with_y(axis));

        Ok(Self {
            trigger: Trigger::outside(lower, upper),
            latch: EdgeLatch::new(),
            detector: ThresholdDetector::new(),
            fired: false,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let acceleration = tick.ego()?.acceleration;
        self.observe(acceleration);
        report.push_values(self.plot, tick.time_s(), &[acceleration])?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        if let Some(stats) = report.series_stats(self.plot, 0) {
            report.add_pair("mean acceleration", format!("{:.3} m/s^2", stats.mean));
            report.add_pair("acceleration variance", format!("{:.4}", stats.variance));
            report.add_pair("min acceleration", format!("{:.3} m/s^2", stats.min));
            report.add_pair("max acceleration", format!("{:.3} m/s^2", stats.max));
        }
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.fired
    }

    fn fail_reason(&self) -> String {
        "acceleration out of bounds".to_string()
    }
}
