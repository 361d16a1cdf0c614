//! Serpentine driving: the yaw rate keeps flipping sign within a short window.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{EdgeLatch, LatchTransition, ThresholdDetector, Trigger};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, Sample, ThresholdOverlay, XYPlot, YAxis};
use crate::grading::ring_buffer::RingBuffer;
use crate::grading::telemetry::TickContext;

/// Largest accepted `Window`, in samples.
pub const MAX_WINDOW: f64 = 10_000.0;

pub struct SnakeDriving {
    window: RingBuffer<f64>,
    yaw_rate_min: f64,
    sign_change_limit: f64,
    latch: EdgeLatch,
    detector: ThresholdDetector,
    fired: bool,
    plot: PlotId,
}

impl SnakeDriving {
    /// Sign flips between consecutive significant yaw-rate samples in the window.
    pub fn sign_changes(&self) -> usize {
        let mut changes = 0;
        let mut prev: Option<bool> = None;
        for &v in self.window.iter().filter(|v| v.abs() >= self.yaw_rate_min) {
            let positive = v > 0.0;
            if matches!(prev, Some(p) if p != positive) {
                changes += 1;
            }
            prev = Some(positive);
        }
        changes
    }

    /// Push one yaw-rate sample; an episode is committed when it begins.
    pub fn observe(&mut self, yaw_rate: f64) -> LatchTransition {
        self.window.push(yaw_rate);
        let changes = self.sign_changes() as f64;
        let transition = self.latch.follow(changes >= self.sign_change_limit);
        self.fired = transition == LatchTransition::Entered
            && self
                .detector
                .detect(changes, Trigger::above(self.sign_change_limit));
        transition
    }
}

impl KpiRule for SnakeDriving {
    const NAME: &'static str = "SnakeDriving";

    fn configure(
        def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let window = def.threshold_or("Window", 20.0)?;
        if !(2.0..=MAX_WINDOW).contains(&window) || window.fract() != 0.0 {
            return Err(ConfigError::MalformedThreshold {
                kpi: def.name.clone(),
                key: "Window".to_string(),
                value: window.to_string(),
            });
        }
        let sign_change_limit = def.threshold_or("SignChanges_H", 3.0)?;
        let plot = report.add_plot(
            XYPlot::over_time("snake driving")
                .with_y(YAxis::new("yaw rate", "rad/s"))
                .with_y(
                    YAxis::new("sign changes", "")
                        .with_upper(ThresholdOverlay::constant("sign change limit", sign_change_limit)),
                ),
        );
        Ok(Self {
            window: RingBuffer::with_capacity(window as usize),
            yaw_rate_min: def.threshold_or("YawRateMin", 0.05)?,
            sign_change_limit,
            latch: EdgeLatch::new(),
            detector: ThresholdDetector::new(),
            fired: false,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let yaw_rate = tick.ego()?.yaw_rate;
        self.observe(yaw_rate);
        report.push(
            self.plot,
            tick.time_s(),
            &[Sample::new(yaw_rate), Sample::new(self.sign_changes() as f64)],
        )?;
        Ok(())
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.fired
    }

    fn fail_reason(&self) -> String {
        "snake driving".to_string()
    }
}
