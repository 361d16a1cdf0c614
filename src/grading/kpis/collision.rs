//! Ego bounding-box collision with any fellow actor.
//!
//! The trailer, when the frame carries one, is checked the same way as the
//! ego. Every contact tick is also graded for a response: braking at least
//! as hard as 1 m/s^2, plus the turn lamp for side, frontal and obstacle
//! contacts.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::ThresholdDetector;
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::geometry::{boxes_overlap, to_body_frame, yaw_diff};
use crate::grading::report::{PlotId, ReportBuilder, XYPlot, YAxis};
use crate::grading::telemetry::{ActorKind, ActorState, TickContext};
use std::fmt;
use tracing::info;

/// Braking weaker than this during contact counts as "no response" (m/s^2).
pub const RESPONSE_DECEL: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    RearEnd,
    RearEnded,
    Vertical,
    Frontal,
    Bevel,
    Vulnerable,
    Static,
}

impl CollisionKind {
    /// Classify by relative heading (vehicles) or actor kind.
    pub fn classify(ego: &ActorState, other: &ActorState) -> Self {
        match other.kind {
            ActorKind::Static => return CollisionKind::Static,
            ActorKind::Vehicle | ActorKind::Ego => {}
            _ => return CollisionKind::Vulnerable,
        }
        let angle = yaw_diff(ego.heading, other.heading).abs();
        if angle < 0.2618 {
            let rel = to_body_frame(ego.position(), ego.heading, other.position());
            if rel.x > 0.0 {
                CollisionKind::RearEnd
            } else {
                CollisionKind::RearEnded
            }
        } else if angle > 1.309 && angle < 1.833 {
            CollisionKind::Vertical
        } else if angle > 2.879 {
            CollisionKind::Frontal
        } else {
            CollisionKind::Bevel
        }
    }
}

impl CollisionKind {
    /// Contacts the ego could have steered around, so a response needs the
    /// turn lamp as well as braking.
    pub fn needs_turn_signal(&self) -> bool {
        matches!(
            self,
            CollisionKind::Vertical | CollisionKind::Frontal | CollisionKind::Bevel | CollisionKind::Static
        )
    }

    /// Whether `ego` reacted to a contact of this kind.
    pub fn responded(&self, ego: &ActorState) -> bool {
        let braking = ego.acceleration <= RESPONSE_DECEL;
        let signalled = !self.needs_turn_signal() || ego.turn_signal.is_on();
        braking && signalled
    }
}

impl fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollisionKind::RearEnd => "rear-end",
            CollisionKind::RearEnded => "rear-ended",
            CollisionKind::Vertical => "vertical",
            CollisionKind::Frontal => "frontal",
            CollisionKind::Bevel => "bevel",
            CollisionKind::Vulnerable => "pedestrian or two-wheeler",
            CollisionKind::Static => "static obstacle",
        };
        f.write_str(s)
    }
}

/// One body in contact with one fellow.
#[derive(Debug, Clone, Copy)]
pub struct Contact<'a> {
    pub body: &'a ActorState,
    pub other: &'a ActorState,
    pub on_trailer: bool,
}

/// First contact of the ego, then of its trailer, with any fellow.
pub fn find_contact<'a>(tick: &TickContext<'a>) -> Option<Contact<'a>> {
    let ego = tick.ego().ok()?;
    let trailer = tick.trailer();
    let own = |a: &ActorState| a.id == ego.id || trailer.is_some_and(|t| t.id == a.id);
    let bodies = std::iter::once((ego, false)).chain(trailer.map(|t| (t, true)));
    for (body, on_trailer) in bodies {
        let body_box = body.corners();
        if let Some(other) = tick
            .fellows()
            .iter()
            .filter(|a| !own(a))
            .find(|a| boxes_overlap(&body_box, &a.corners()))
        {
            return Some(Contact {
                body,
                other,
                on_trailer,
            });
        }
    }
    None
}

pub struct Collision {
    detector: ThresholdDetector,
    first_kind: Option<CollisionKind>,
    first_on_trailer: bool,
    unanswered_ticks: u64,
    plot: PlotId,
}

impl Collision {
    pub fn first_kind(&self) -> Option<CollisionKind> {
        self.first_kind
    }

    /// Contact ticks without an adequate response.
    pub fn unanswered_ticks(&self) -> u64 {
        self.unanswered_ticks
    }
}

impl KpiRule for Collision {
    const NAME: &'static str = "Collision";

    fn configure(
        _def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let plot = report.add_plot(
            XYPlot::over_time("collision")
                .with_y(YAxis::new("collision", ""))
                .with_y(YAxis::new("no response", "")),
        );
        Ok(Self {
            detector: ThresholdDetector::new(),
            first_kind: None,
            first_on_trailer: false,
            unanswered_ticks: 0,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let ego = tick.ego()?;
        let contact = find_contact(tick);

        let mut no_response = false;
        if let Some(c) = contact {
            let kind = CollisionKind::classify(c.body, c.other);
            no_response = !kind.responded(ego);
            info!(
                t = tick.time_s(),
                fellow = c.other.id,
                %kind,
                trailer = c.on_trailer,
                distance = c.body.distance_to(c.other),
                "ego collision"
            );
            if self.first_kind.is_none() {
                self.first_kind = Some(kind);
                self.first_on_trailer = c.on_trailer;
            }
        }
        if no_response {
            self.unanswered_ticks += 1;
        }
        self.detector.detect_flag(contact.is_some());

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        report.push_values(
            self.plot,
            tick.time_s(),
            &[flag(contact.is_some()), flag(no_response)],
        )?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        if self.detector.count() > 0 {
            report.add_pair("no response ticks", self.unanswered_ticks.to_string());
        }
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.detector.latest_state()
    }

    fn fail_reason(&self) -> String {
        match self.first_kind {
            Some(kind) if self.first_on_trailer => format!("collision ({}, trailer)", kind),
            Some(kind) => format!("collision ({})", kind),
            None => "collision".to_string(),
        }
    }

    fn pass_reason(&self) -> String {
        "collision check pass".to_string()
    }
}
