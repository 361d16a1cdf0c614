//! Collisions the ego did not cause.
//!
//! A contact is passive when the ego was standing still, or when the other
//! actor drove into it: the other's front corners are inside the ego box
//! while none of the ego's leading corners (front, or rear when reversing)
//! are inside the other's box, or the ego's trailing corners are inside the
//! other's box. Static obstacles never make a passive contact.
//!
//! A contact is classified once, when it begins, and holds until the boxes
//! separate. Every tick of a held passive contact is detected.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{EdgeLatch, LatchTransition, ThresholdDetector};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::geometry::{boxes_overlap, corners_inside, yaw_diff};
use crate::grading::report::{PlotId, ReportBuilder, XYPlot, YAxis};
use crate::grading::telemetry::{ActorKind, ActorState, TickContext};
use std::f64::consts::PI;
use std::fmt;
use tracing::info;

/// At or below this the ego counts as standing (m/s).
pub const STANDSTILL_SPEED: f64 = 0.1;

const FRONT: [usize; 2] = [0, 1];
const REAR: [usize; 2] = [2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveKind {
    /// Hit while standing still.
    Stopped,
    /// Struck from behind the direction of travel.
    RearEnded { reversing: bool },
    /// Struck from the side by a crossing actor.
    Side { reversing: bool },
    /// Struck by an actor moving the other way.
    Oncoming { reversing: bool },
}

impl PassiveKind {
    /// Classify a contact between `ego` and `other`, or `None` when the ego
    /// caused it.
    pub fn classify(ego: &ActorState, other: &ActorState) -> Option<Self> {
        if !other.kind.is_dynamic() || other.kind == ActorKind::Ego {
            return None;
        }
        if ego.speed.abs() <= STANDSTILL_SPEED {
            return Some(PassiveKind::Stopped);
        }

        let reversing = ego.is_reversing();
        let ego_box = ego.corners();
        let other_box = other.corners();
        let ego_in_other = corners_inside(&ego_box, &other_box);
        let other_in_ego = corners_inside(&other_box, &ego_box);
        let any = |flags: &[bool; 4], idx: [usize; 2]| idx.iter().any(|&i| flags[i]);

        let (leading, trailing) = if reversing { (REAR, FRONT) } else { (FRONT, REAR) };
        let struck_by_front = any(&other_in_ego, FRONT) && !any(&ego_in_other, leading);
        let trailing_buried = any(&ego_in_other, trailing) && !any(&ego_in_other, leading);
        if !(struck_by_front || trailing_buried) {
            return None;
        }

        let angle = yaw_diff(ego.heading, other.heading).abs();
        // travel direction of the ego, folded so "same way" means small
        let travel = if reversing { PI - angle } else { angle };
        Some(if travel < 75f64.to_radians() {
            PassiveKind::RearEnded { reversing }
        } else if travel <= 105f64.to_radians() {
            PassiveKind::Side { reversing }
        } else {
            PassiveKind::Oncoming { reversing }
        })
    }
}

impl fmt::Display for PassiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (s, reversing) = match *self {
            PassiveKind::Stopped => ("hit while stopped", false),
            PassiveKind::RearEnded { reversing } => ("rear-ended", reversing),
            PassiveKind::Side { reversing } => ("side impact", reversing),
            PassiveKind::Oncoming { reversing } => ("oncoming impact", reversing),
        };
        if reversing {
            write!(f, "{} while reversing", s)
        } else {
            f.write_str(s)
        }
    }
}

pub struct CollisionPassive {
    latch: EdgeLatch,
    current: Option<PassiveKind>,
    last_kind: Option<PassiveKind>,
    detector: ThresholdDetector,
    plot: PlotId,
}

impl CollisionPassive {
    pub fn last_kind(&self) -> Option<PassiveKind> {
        self.last_kind
    }

    /// Update with the fellow in contact, if any. Returns whether a passive
    /// contact is held on this tick.
    pub fn observe(&mut self, ego: &ActorState, contact: Option<&ActorState>) -> bool {
        match self.latch.follow(contact.is_some()) {
            LatchTransition::Entered => {
                self.current = contact.and_then(|other| PassiveKind::classify(ego, other));
                if let Some(kind) = self.current {
                    self.last_kind = Some(kind);
                }
            }
            LatchTransition::Released | LatchTransition::Idle => self.current = None,
            LatchTransition::Held => {}
        }
        self.detector.detect_flag(self.current.is_some())
    }
}

impl KpiRule for CollisionPassive {
    const NAME: &'static str = "CollisionPassive";

    fn configure(
        _def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let plot = report.add_plot(
            XYPlot::over_time("collision passive").with_y(YAxis::new("passive collision", "")),
        );
        Ok(Self {
            latch: EdgeLatch::new(),
            current: None,
            last_kind: None,
            detector: ThresholdDetector::new(),
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let ego = tick.ego()?;
        let ego_box = ego.corners();
        let contact = tick
            .fellows()
            .iter()
            .filter(|a| a.id != ego.id && a.kind.is_dynamic())
            .find(|a| boxes_overlap(&ego_box, &a.corners()));

        let was_held = self.latch.is_active();
        let passive = self.observe(ego, contact);
        if passive && !was_held {
            if let (Some(kind), Some(other)) = (self.current, contact) {
                info!(t = tick.time_s(), fellow = other.id, %kind, "passive collision");
            }
        }

        report.push_values(self.plot, tick.time_s(), &[if passive { 1.0 } else { 0.0 }])?;
        Ok(())
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.detector.latest_state()
    }

    fn fail_reason(&self) -> String {
        match self.last_kind {
            Some(kind) => format!("passive collision ({})", kind),
            None => "passive collision".to_string(),
        }
    }

    fn pass_reason(&self) -> String {
        "no passive collision".to_string()
    }
}
