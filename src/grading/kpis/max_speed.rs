//! Maximum ego speed.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{ThresholdDetector, Trigger};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, ThresholdOverlay, XYPlot, YAxis};
use crate::grading::telemetry::TickContext;

/// Counts every tick on which ego speed reaches `Speed_H` (m/s).
pub struct MaxSpeed {
    speed_limit: f64,
    detector: ThresholdDetector,
    max_seen: f64,
    plot: PlotId,
}

impl MaxSpeed {
    /// Feed one speed sample straight into the detector.
    pub fn observe(&mut self, speed: f64) -> bool {
        self.max_seen = self.max_seen.max(speed);
        self.detector.detect(speed, Trigger::above(self.speed_limit))
    }

    pub fn max_seen(&self) -> f64 {
        self.max_seen
    }
}

impl KpiRule for MaxSpeed {
    const NAME: &'static str = "MaxSpeed";

    fn configure(
        def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let speed_limit = def.threshold("Speed_H")?;
        let plot = report.add_plot(
            XYPlot::over_time("speed").with_y(
                YAxis::new("speed", "m/s")
                    .with_upper(ThresholdOverlay::constant("max speed", speed_limit)),
            ),
        );
        Ok(Self {
            speed_limit,
            detector: ThresholdDetector::new(),
            max_seen: 0.0,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let speed = tick.ego()?.speed;
        self.observe(speed);
        report.push_values(self.plot, tick.time_s(), &[speed])?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        if let Some(stats) = report.series_stats(self.plot, 0) {
            report.add_pair("max speed", format!("{:.3} m/s", stats.max));
            report.add_pair("mean speed", format!("{:.3} m/s", stats.mean));
        }
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.detector.latest_state()
    }

    fn fail_reason(&self) -> String {
        "over max speed".to_string()
    }

    fn pass_reason(&self) -> String {
        "max speed check pass".to_string()
    }
}
