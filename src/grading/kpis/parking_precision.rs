//! Final parking pose against the target parking space.
//!
//! Once the parking function reports completion, each wheel corner's lateral
//! distance to the space sides, the front/rear distance to the space ends and
//! the body angle are checked against their thresholds. The detected count is
//! the sum over all seven checks.
//!
//! The body angle is the raw heading difference to the space. With
//! `AllowReverse` set, a pose facing the opposite way is folded back so
//! tail-in parking counts as aligned.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{ThresholdDetector, Trigger};
use crate::grading::error::{ConfigError, SkipReason, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::geometry::{point_in_polygon, point_to_segment_distance, yaw_diff, Corners};
use crate::grading::report::{ReportBuilder, SheetId, SheetTable};
use crate::grading::telemetry::{topics, ActorState, TickContext};
use nalgebra::{center, Point2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkingStage {
    Searching,
    Parking,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// `PARKING_STATE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingState {
    pub stage: ParkingStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanePoint {
    pub x: f64,
    pub y: f64,
}

impl From<PlanePoint> for Point2<f64> {
    fn from(p: PlanePoint) -> Self {
        Point2::new(p.x, p.y)
    }
}

/// One slot; corners named left/right, top/bottom as seen on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSpace {
    pub id: i64,
    pub lt: PlanePoint,
    pub lb: PlanePoint,
    pub rt: PlanePoint,
    pub rb: PlanePoint,
    #[serde(default)]
    pub yaw: f64,
}

/// `PARKING_SPACE` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkingSpaces {
    #[serde(default)]
    pub spaces: Vec<ParkingSpace>,
}

// =============================================================================
// MEASUREMENT
// =============================================================================

/// Distances (m) and body angle (rad) of one parked pose.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParkingMeasurement {
    /// front-left, front-right, rear-left, rear-right
    pub lateral: [f64; 4],
    pub vertical_front: f64,
    pub vertical_rear: f64,
    pub body_angle: f64,
    pub inside: bool,
}

impl ParkingMeasurement {
    pub fn measure(ego: &ActorState, space: &ParkingSpace) -> Self {
        let [lt, lb, rt, rb]: [Point2<f64>; 4] =
            [space.lt.into(), space.lb.into(), space.rt.into(), space.rb.into()];
        let corners: Corners = ego.corners();
        let [fl, fr, rr, rl] = corners;

        // the long edges are the sides, the short edges the ends
        let (sides, ends) = if (lt - lb).norm() > (lt - rt).norm() {
            ([(lt, lb), (rt, rb)], [(lt, rt), (lb, rb)])
        } else {
            ([(lt, rt), (lb, rb)], [(lt, lb), (rt, rb)])
        };
        let nearest = |edges: &[(Point2<f64>, Point2<f64>); 2], p: Point2<f64>| {
            edges
                .iter()
                .map(|(a, b)| point_to_segment_distance(*a, *b, p))
                .fold(f64::INFINITY, f64::min)
        };

        let outline = [lt, rt, rb, lb];
        Self {
            lateral: [
                nearest(&sides, fl),
                nearest(&sides, fr),
                nearest(&sides, rl),
                nearest(&sides, rr),
            ],
            vertical_front: nearest(&ends, center(&fl, &fr)),
            vertical_rear: nearest(&ends, center(&rl, &rr)),
            body_angle: yaw_diff(ego.heading, space.yaw).abs(),
            inside: corners.iter().all(|c| point_in_polygon(*c, &outline)),
        }
    }

    /// Treat a reversed pose as aligned: the angle becomes `min(a, PI - a)`.
    pub fn allow_reverse(mut self) -> Self {
        self.body_angle = self.body_angle.min(PI - self.body_angle);
        self
    }
}

// =============================================================================
// RULE
// =============================================================================

const LATERAL_LABELS: [&str; 4] = [
    "front left lateral",
    "front right lateral",
    "rear left lateral",
    "rear right lateral",
];

pub struct ParkingPrecision {
    space_id: i64,
    lateral_limit: f64,
    vertical_limit: f64,
    angle_limit: f64,
    allow_reverse: bool,
    lateral: [ThresholdDetector; 4],
    vertical: [ThresholdDetector; 2],
    angle: ThresholdDetector,
    worst: ParkingMeasurement,
    always_inside: bool,
    measured: bool,
    sheet: SheetId,
}

impl ParkingPrecision {
    /// Run all seven checks on one measurement.
    pub fn check(&mut self, m: &ParkingMeasurement) {
        for (detector, value) in self.lateral.iter_mut().zip(m.lateral) {
            detector.detect(value, Trigger::above(self.lateral_limit));
        }
        for (detector, value) in self.vertical.iter_mut().zip([m.vertical_front, m.vertical_rear]) {
            detector.detect(value, Trigger::above(self.vertical_limit));
        }
        self.angle.detect(m.body_angle, Trigger::above(self.angle_limit));

        for (worst, value) in self.worst.lateral.iter_mut().zip(m.lateral) {
            *worst = worst.max(value);
        }
        self.worst.vertical_front = self.worst.vertical_front.max(m.vertical_front);
        self.worst.vertical_rear = self.worst.vertical_rear.max(m.vertical_rear);
        self.worst.body_angle = self.worst.body_angle.max(m.body_angle);
        self.always_inside &= m.inside;
        self.measured = true;
    }

    pub fn worst(&self) -> &ParkingMeasurement {
        &self.worst
    }

    fn detectors(&self) -> impl Iterator<Item = &ThresholdDetector> {
        self.lateral
            .iter()
            .chain(self.vertical.iter())
            .chain(std::iter::once(&self.angle))
    }
}

impl KpiRule for ParkingPrecision {
    const NAME: &'static str = "ParkingPrecision";

    fn configure(
        def: &KpiDefinition,
        _settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let space_id = def.threshold("ParkingSpaceId")?;
        let sheet = report.add_sheet(SheetTable::new(
            "parking precision",
            &[
                "t",
                "front left lateral",
                "front right lateral",
                "rear left lateral",
                "rear right lateral",
                "front vertical",
                "rear vertical",
                "body angle",
            ],
        ));
        Ok(Self {
            space_id: space_id as i64,
            lateral_limit: def.threshold("LateralThreshold")?,
            vertical_limit: def.threshold("VerticalThreshold")?,
            angle_limit: def.threshold("BodyAngleThreshold")?,
            allow_reverse: def.threshold_or("AllowReverse", 0.0)? >= 0.5,
            lateral: Default::default(),
            vertical: Default::default(),
            angle: ThresholdDetector::new(),
            worst: ParkingMeasurement::default(),
            always_inside: true,
            measured: false,
            sheet,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let ego = tick.ego()?;
        let state: ParkingState = tick.decode(topics::PARKING_STATE)?;
        if state.stage != ParkingStage::Completed {
            return Ok(());
        }
        let spaces: ParkingSpaces = tick.decode(topics::PARKING_SPACE)?;
        let space = spaces
            .spaces
            .iter()
            .find(|s| s.id == self.space_id)
            .ok_or_else(|| SkipReason::MissingTelemetry(format!("parking space {}", self.space_id)))?;

        let mut m = ParkingMeasurement::measure(ego, space);
        if self.allow_reverse {
            m = m.allow_reverse();
        }
        self.check(&m);

        let mut row = vec![format!("{:.3}", tick.time_s())];
        row.extend(m.lateral.iter().map(|v| format!("{:.3}", v)));
        row.push(format!("{:.3}", m.vertical_front));
        row.push(format!("{:.3}", m.vertical_rear));
        row.push(format!("{:.4}", m.body_angle));
        report.push_row(self.sheet, &row)?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        if !self.measured {
            return;
        }
        for (label, value) in LATERAL_LABELS.iter().zip(self.worst.lateral) {
            report.add_pair(*label, format!("{:.3} m", value));
        }
        report.add_pair("front vertical", format!("{:.3} m", self.worst.vertical_front));
        report.add_pair("rear vertical", format!("{:.3} m", self.worst.vertical_rear));
        report.add_pair("body angle", format!("{:.4} rad", self.worst.body_angle));
        report.add_pair(
            "inside space",
            if self.always_inside { "yes" } else { "no" },
        );
    }

    fn detected_count(&self) -> u64 {
        self.detectors().map(ThresholdDetector::count).sum()
    }

    fn latest_event(&self) -> bool {
        self.detectors().any(ThresholdDetector::latest_state)
    }

    fn fail_reason(&self) -> String {
        "imprecise parking".to_string()
    }

    fn pass_reason(&self) -> String {
        "parking precision check pass".to_string()
    }
}
