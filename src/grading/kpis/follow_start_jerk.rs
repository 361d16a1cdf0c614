//! Jerk while starting off behind a leading vehicle.
//!
//! The event opens when the ego is practically matched to a leading vehicle
//! that starts pulling away, and closes once both are moving faster than the
//! start speed. Jerk is only checked while the event is open.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{EdgeLatch, LatchTransition, ThresholdDetector, Trigger};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, Sample, ThresholdOverlay, XYPlot, YAxis};
use crate::grading::telemetry::{ActorState, TickContext};

const DEFAULT_START_SPEED: f64 = 1.39;
const DEFAULT_FRONT_ACCEL: f64 = 0.1;
const DEFAULT_FOLLOW_RANGE: f64 = 100.0;

pub struct FollowStartJerk {
    jerk_limit: f64,
    start_speed: f64,
    front_accel: f64,
    follow_range: f64,
    latch: EdgeLatch,
    detector: ThresholdDetector,
    last_transition: LatchTransition,
    plot: PlotId,
}

impl FollowStartJerk {
    /// Advance the latch for one (ego, leading vehicle) observation and run
    /// the jerk check if the event is open.
    pub fn observe(&mut self, ego: &ActorState, front: Option<&ActorState>) -> LatchTransition {
        let (enter, release) = match front {
            Some(front) => (
                (front.speed - ego.speed).abs() <= self.start_speed
                    && front.acceleration > self.front_accel,
                ego.speed > self.start_speed && front.speed > self.start_speed,
            ),
            // losing the leading vehicle aborts the event
            None => (false, true),
        };
        let transition = self.latch.update(enter, release);
        if transition.is_active() {
            self.detector
                .detect(ego.jerk.abs(), Trigger::above(self.jerk_limit));
        }
        self.last_transition = transition;
        transition
    }

    pub fn is_latched(&self) -> bool {
        self.latch.is_active()
    }

    /// Number of jerk checks performed.
    pub fn detect_calls(&self) -> u64 {
        self.detector.calls()
    }

    /// Number of follow-start events seen.
    pub fn events(&self) -> u64 {
        self.latch.entries()
    }
}

impl KpiRule for FollowStartJerk {
    const NAME: &'static str = "FollowStartJerk";

    fn configure(
        def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let jerk_limit = def.threshold("Jerk_H")?;
        let plot = report.add_plot(
            XYPlot::over_time("follow start jerk")
                .with_y(
                    YAxis::new("jerk", "m/s^3")
                        .with_upper(ThresholdOverlay::constant("jerk limit", jerk_limit)),
                )
                .with_y(YAxis::new("follow start", "")),
        );
        Ok(Self {
            jerk_limit,
            start_speed: def.threshold_or("StartSpeed", DEFAULT_START_SPEED)?,
            front_accel: def.threshold_or("FrontAccel", DEFAULT_FRONT_ACCEL)?,
            follow_range: def.threshold_or("FollowRange", DEFAULT_FOLLOW_RANGE)?,
            latch: EdgeLatch::new(),
            detector: ThresholdDetector::new(),
            last_transition: LatchTransition::Idle,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let ego = tick.ego()?;
        let front = tick.leading_vehicle(self.follow_range);
        let transition = self.observe(ego, front);
        let latched = if transition.is_active() { 1.0 } else { 0.0 };
        report.push(
            self.plot,
            tick.time_s(),
            &[Sample::new(ego.jerk.abs()), Sample::new(latched)],
        )?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        report.add_pair("follow start events", self.events().to_string());
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.last_transition.is_active() && self.detector.latest_state()
    }

    fn fail_reason(&self) -> String {
        "jerk too high when following start".to_string()
    }
}
