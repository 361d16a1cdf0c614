//! Telemetry View
//!
//! Read-only accessors over one simulation tick: ego and fellow actors, the
//! map attributes at the ego position, and the message bus. Collaborators
//! build a [`TickContext`] fresh every tick; evaluators only borrow it.

use crate::grading::clock::{nanos_to_secs, Nanos};
use crate::grading::error::SkipReason;
use crate::grading::geometry::{box_corners, to_body_frame, Corners};
use nalgebra::Point2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known bus topics.
pub mod topics {
    pub const PARKING_STATE: &str = "PARKING_STATE";
    pub const PARKING_SPACE: &str = "PARKING_SPACE";
    pub const CHASSIS: &str = "CHASSIS";
    pub const TRAJECTORY: &str = "TRAJECTORY";
    pub const PREDICTION: &str = "PREDICTION";
}

/// Lateral half-width used to decide "same lane" when lane ids are unknown (m).
pub const LANE_HALF_WIDTH: f64 = 1.75;

// =============================================================================
// ACTORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Ego,
    #[default]
    Vehicle,
    Pedestrian,
    Bike,
    Motor,
    Animal,
    Static,
}

impl ActorKind {
    /// Actors that move on their own.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, ActorKind::Static)
    }
}

/// Turn lamp state reported with the ego body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSignal {
    #[default]
    Off,
    Left,
    Right,
    Hazard,
}

impl TurnSignal {
    #[inline]
    pub fn is_on(&self) -> bool {
        !matches!(self, TurnSignal::Off)
    }
}

/// HD-map lane address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaneId {
    pub road: u64,
    pub section: u64,
    pub lane: i64,
}

fn default_length() -> f64 {
    4.5
}

fn default_width() -> f64 {
    1.8
}

/// Kinematic state of one actor, box centre in local ENU metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: i64,
    #[serde(default)]
    pub kind: ActorKind,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    /// Yaw, radians counter-clockwise from east.
    #[serde(default)]
    pub heading: f64,
    /// m/s along the heading, negative while reversing.
    #[serde(default)]
    pub speed: f64,
    /// Longitudinal, m/s^2
    #[serde(default)]
    pub acceleration: f64,
    /// Longitudinal, m/s^3
    #[serde(default)]
    pub jerk: f64,
    /// rad/s
    #[serde(default)]
    pub yaw_rate: f64,
    #[serde(default = "default_length")]
    pub length: f64,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default)]
    pub lane: Option<LaneId>,
    #[serde(default)]
    pub turn_signal: TurnSignal,
}

impl ActorState {
    pub fn new(id: i64, kind: ActorKind, x: f64, y: f64) -> Self {
        Self {
            id,
            kind,
            x,
            y,
            z: 0.0,
            heading: 0.0,
            speed: 0.0,
            acceleration: 0.0,
            jerk: 0.0,
            yaw_rate: 0.0,
            length: default_length(),
            width: default_width(),
            lane: None,
            turn_signal: TurnSignal::Off,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn with_jerk(mut self, jerk: f64) -> Self {
        self.jerk = jerk;
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    pub fn with_yaw_rate(mut self, yaw_rate: f64) -> Self {
        self.yaw_rate = yaw_rate;
        self
    }

    pub fn with_size(mut self, length: f64, width: f64) -> Self {
        self.length = length;
        self.width = width;
        self
    }

    pub fn with_turn_signal(mut self, turn_signal: TurnSignal) -> Self {
        self.turn_signal = turn_signal;
        self
    }

    #[inline]
    pub fn is_reversing(&self) -> bool {
        self.speed < 0.0
    }

    #[inline]
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    /// Bounding box corners: front-left, front-right, rear-right, rear-left.
    pub fn corners(&self) -> Corners {
        box_corners(self.position(), self.heading, self.length, self.width)
    }

    pub fn distance_to(&self, other: &ActorState) -> f64 {
        (other.position() - self.position()).norm()
    }
}

// =============================================================================
// MAP
// =============================================================================

/// Lane limits at or below this are treated as missing (m/s).
pub const MIN_VALID_SPEED_LIMIT: f64 = 1.0;

/// Movement a lane permits through the next junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Straight,
    Left,
    Right,
    UTurnLeft,
    UTurnRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
}

/// Map attributes resolved at the ego position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
    #[serde(default)]
    pub lane: Option<LaneId>,
    /// Lane speed limit (m/s), when the map has one.
    #[serde(default)]
    pub speed_limit_mps: Option<f64>,
    #[serde(default)]
    pub curvature: f64,
    #[serde(default)]
    pub slope: f64,
    #[serde(default)]
    pub in_junction: bool,
    /// Ego box touches a solid lane marking.
    #[serde(default)]
    pub on_solid_line: bool,
    /// Side of the dashed boundary the ego box is crossing, if any.
    #[serde(default)]
    pub on_dashed_line: Option<LaneSide>,
    /// Light controlling the ego lane, when one is visible.
    #[serde(default)]
    pub signal: Option<SignalColor>,
    /// Movements the current lane allows at the next junction. Empty when
    /// the map carries no lane links here.
    #[serde(default)]
    pub allowed_turns: Vec<TurnDirection>,
}

impl MapInfo {
    /// Lane limit when the map has a usable one, `default` otherwise.
    pub fn speed_limit_or(&self, default: f64) -> f64 {
        self.speed_limit_mps
            .filter(|v| *v > MIN_VALID_SPEED_LIMIT)
            .unwrap_or(default)
    }
}

// =============================================================================
// MESSAGE BUS
// =============================================================================

/// Latest payload per topic, delivered synchronously for the tick.
pub trait MessageBus {
    fn get(&self, topic: &str) -> Option<&[u8]>;
}

/// Bus with no traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBus;

impl MessageBus for NoBus {
    fn get(&self, _topic: &str) -> Option<&[u8]> {
        None
    }
}

/// In-memory topic -> payload table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBuffer {
    payloads: HashMap<String, Vec<u8>>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.payloads.insert(topic.into(), payload.into());
    }

    /// Encode `value` as JSON and publish it on `topic`.
    pub fn insert_json<T: Serialize>(
        &mut self,
        topic: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.insert(topic, bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl MessageBus for MessageBuffer {
    fn get(&self, topic: &str) -> Option<&[u8]> {
        self.payloads.get(topic).map(Vec::as_slice)
    }
}

// =============================================================================
// TICK CONTEXT
// =============================================================================

/// Everything an evaluator may read during one Step.
#[derive(Clone, Copy)]
pub struct TickContext<'a> {
    /// Zero-based tick index.
    pub tick: u64,
    pub time: Nanos,
    /// Duration of this tick (s).
    pub dt_s: f64,
    ego: Option<&'a ActorState>,
    trailer: Option<&'a ActorState>,
    fellows: &'a [ActorState],
    map: Option<&'a MapInfo>,
    bus: &'a dyn MessageBus,
}

impl<'a> TickContext<'a> {
    pub fn new(tick: u64, time: Nanos, dt_s: f64, bus: &'a dyn MessageBus) -> Self {
        Self {
            tick,
            time,
            dt_s,
            ego: None,
            trailer: None,
            fellows: &[],
            map: None,
            bus,
        }
    }

    pub fn with_ego(mut self, ego: Option<&'a ActorState>) -> Self {
        self.ego = ego;
        self
    }

    pub fn with_trailer(mut self, trailer: Option<&'a ActorState>) -> Self {
        self.trailer = trailer;
        self
    }

    pub fn with_fellows(mut self, fellows: &'a [ActorState]) -> Self {
        self.fellows = fellows;
        self
    }

    pub fn with_map(mut self, map: Option<&'a MapInfo>) -> Self {
        self.map = map;
        self
    }

    /// Simulation time in seconds.
    #[inline]
    pub fn time_s(&self) -> f64 {
        nanos_to_secs(self.time)
    }

    /// Ego actor, or a tick-local skip when the simulator has none.
    pub fn ego(&self) -> Result<&'a ActorState, SkipReason> {
        self.ego
            .ok_or_else(|| SkipReason::MissingTelemetry("ego actor".to_string()))
    }

    /// Trailer towed by the ego, if any.
    pub fn trailer(&self) -> Option<&'a ActorState> {
        self.trailer
    }

    pub fn map(&self) -> Option<&'a MapInfo> {
        self.map
    }

    pub fn fellows(&self) -> &'a [ActorState] {
        self.fellows
    }

    pub fn fellows_by_kind(&self, kind: ActorKind) -> impl Iterator<Item = &'a ActorState> + 'a {
        self.fellows.iter().filter(move |a| a.kind == kind)
    }

    /// Fellows whose centre lies within `radius` of the ego centre.
    pub fn fellows_within(&self, radius: f64) -> Vec<&'a ActorState> {
        match self.ego {
            Some(ego) => self
                .fellows
                .iter()
                .filter(|a| ego.distance_to(a) <= radius)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Nearest vehicle ahead of the ego in its lane, within `max_range` metres.
    pub fn leading_vehicle(&self, max_range: f64) -> Option<&'a ActorState> {
        let ego = self.ego?;
        self.fellows
            .iter()
            .filter(|a| a.kind == ActorKind::Vehicle)
            .filter_map(|a| {
                let rel = to_body_frame(ego.position(), ego.heading, a.position());
                let same_lane = match (ego.lane, a.lane) {
                    (Some(l_ego), Some(l_fellow)) => l_ego == l_fellow,
                    _ => rel.y.abs() <= LANE_HALF_WIDTH,
                };
                (rel.x > 0.0 && rel.x <= max_range && same_lane).then_some((rel.x, a))
            })
            .min_by(|(da, _), (db, _)| da.total_cmp(db))
            .map(|(_, a)| a)
    }

    /// Raw payload on `topic`.
    pub fn payload(&self, topic: &str) -> Result<&'a [u8], SkipReason> {
        match self.bus.get(topic) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(SkipReason::MissingTelemetry(format!("topic {}", topic))),
        }
    }

    /// Decode the JSON payload on `topic`.
    pub fn decode<T: DeserializeOwned>(&self, topic: &str) -> Result<T, SkipReason> {
        let bytes = self.payload(topic)?;
        serde_json::from_slice(bytes).map_err(|e| SkipReason::PayloadParse {
            topic: topic.to_string(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ego_is_transient_skip() {
        let tick = TickContext::new(0, 0, 0.01, &NoBus);
        let err = tick.ego().unwrap_err();
        assert!(err.is_transient());
        assert!(tick.fellows_within(50.0).is_empty());
        assert!(tick.leading_vehicle(100.0).is_none());
    }

    #[test]
    fn test_leading_vehicle_picks_nearest_in_lane() {
        let ego = ActorState::new(0, ActorKind::Ego, 0.0, 0.0);
        let fellows = vec![
            ActorState::new(1, ActorKind::Vehicle, 30.0, 0.5),
            ActorState::new(2, ActorKind::Vehicle, 12.0, 0.0),
            ActorState::new(3, ActorKind::Vehicle, 8.0, 3.5),
            ActorState::new(4, ActorKind::Vehicle, -6.0, 0.0),
            ActorState::new(5, ActorKind::Pedestrian, 5.0, 0.0),
        ];
        let tick = TickContext::new(0, 0, 0.01, &NoBus)
            .with_ego(Some(&ego))
            .with_fellows(&fellows);
        assert_eq!(tick.leading_vehicle(100.0).map(|a| a.id), Some(2));
        assert_eq!(tick.leading_vehicle(10.0).map(|a| a.id), None);
        assert_eq!(tick.fellows_by_kind(ActorKind::Pedestrian).count(), 1);
        assert_eq!(tick.fellows_within(10.0).len(), 3);
    }

    #[test]
    fn test_map_speed_limit_fallback() {
        let mut map = MapInfo::default();
        assert_eq!(map.speed_limit_or(20.0), 20.0);
        map.speed_limit_mps = Some(1.0);
        assert_eq!(map.speed_limit_or(20.0), 20.0);
        map.speed_limit_mps = Some(16.7);
        assert_eq!(map.speed_limit_or(20.0), 16.7);
    }

    #[test]
    fn test_map_info_new_fields_default() {
        let map: MapInfo = serde_json::from_str(r#"{"in_junction": true}"#).unwrap();
        assert!(!map.on_solid_line);
        assert!(map.signal.is_none());
        assert!(map.allowed_turns.is_empty());

        let map: MapInfo =
            serde_json::from_str(r#"{"signal": "red", "allowed_turns": ["left", "u_turn_left"]}"#).unwrap();
        assert_eq!(map.signal, Some(SignalColor::Red));
        assert_eq!(map.allowed_turns, vec![TurnDirection::Left, TurnDirection::UTurnLeft]);
    }

    #[test]
    fn test_decode_payloads() {
        #[derive(Deserialize)]
        struct Chassis {
            takeover: bool,
        }

        let mut bus = MessageBuffer::new();
        bus.insert(topics::CHASSIS, br#"{"takeover": true}"#.to_vec());
        bus.insert(topics::PARKING_STATE, b"not json".to_vec());
        let tick = TickContext::new(0, 0, 0.01, &bus);

        assert!(tick.decode::<Chassis>(topics::CHASSIS).unwrap().takeover);
        assert!(matches!(
            tick.decode::<Chassis>(topics::PARKING_STATE),
            Err(SkipReason::PayloadParse { .. })
        ));
        assert!(matches!(
            tick.decode::<Chassis>(topics::TRAJECTORY),
            Err(SkipReason::MissingTelemetry(_))
        ));
    }
}
