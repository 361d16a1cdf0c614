//! Ego Driving State Flow
//!
//! Small state machine over the ego's motion, fed once per tick. It tracks
//! what the ego is doing (standing, driving in lane, changing lane, crossing
//! a junction, reversing) and reports a [`Behavior`] for the tick. When a
//! lane change or junction crossing ends, the behaviour of that tick carries
//! `completed = true` and the manoeuvre duration.
//!
//! ```text
//!            |v| > stop, forward              in junction
//!  Stopped ─────────────────────▶ Driving ──────────────────▶ InJunction
//!     ▲  │                        ▲  │  ▲                         │
//!     │  │ |v| > stop, backward   │  │  └─── left junction ───────┘
//!     │  ▼                        │  │ on dashed line
//!  Reversing                      │  ▼
//!     (|v| < stop: back to Stopped)  LaneChanging
//! ```

use crate::grading::geometry::{to_body_frame, yaw_diff};
use crate::grading::telemetry::{ActorState, LaneId, LaneSide, MapInfo, TurnDirection};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrivingState {
    Stopped,
    Driving,
    LaneChanging,
    InJunction,
    Reversing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Stopped,
    Crawling,
    StartUp,
    Stopping,
    Driving,
    LaneChangeLeft,
    LaneChangeRight,
    TurnLeft,
    TurnRight,
    UTurnLeft,
    UTurnRight,
    Reversing,
}

impl Behavior {
    /// Movement through a junction this behaviour stands for.
    pub fn junction_movement(&self) -> Option<TurnDirection> {
        match self {
            Behavior::Driving => Some(TurnDirection::Straight),
            Behavior::TurnLeft => Some(TurnDirection::Left),
            Behavior::TurnRight => Some(TurnDirection::Right),
            Behavior::UTurnLeft => Some(TurnDirection::UTurnLeft),
            Behavior::UTurnRight => Some(TurnDirection::UTurnRight),
            _ => None,
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Behavior::Stopped => "stopped",
            Behavior::Crawling => "crawling",
            Behavior::StartUp => "start-up",
            Behavior::Stopping => "stopping",
            Behavior::Driving => "driving",
            Behavior::LaneChangeLeft => "lane change left",
            Behavior::LaneChangeRight => "lane change right",
            Behavior::TurnLeft => "turn left",
            Behavior::TurnRight => "turn right",
            Behavior::UTurnLeft => "u-turn left",
            Behavior::UTurnRight => "u-turn right",
            Behavior::Reversing => "reversing",
        };
        f.write_str(s)
    }
}

/// Behaviour of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowOutput {
    pub behavior: Behavior,
    /// A lane change or junction crossing ended on this tick.
    pub completed: bool,
    /// Length of the completed manoeuvre (s).
    pub duration_s: f64,
}

impl FlowOutput {
    fn ongoing(behavior: Behavior) -> Self {
        Self {
            behavior,
            completed: false,
            duration_s: 0.0,
        }
    }
}

/// Tuning of the state flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowParams {
    /// Below this the ego counts as stopped (m/s).
    pub stop_speed: f64,
    /// Below this a stopped ego is standing rather than crawling (m/s).
    pub standstill_speed: f64,
    /// Consecutive rising or falling samples for start-up or stopping.
    pub monotonic_samples: u32,
    /// Heading change that makes a junction crossing a turn (rad).
    pub turn_angle: f64,
    /// Heading change that makes a junction crossing a U-turn (rad).
    pub u_turn_angle: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            stop_speed: 0.5,
            standstill_speed: 0.1,
            monotonic_samples: 3,
            turn_angle: 30f64.to_radians(),
            u_turn_angle: 150f64.to_radians(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pose {
    position: Point2<f64>,
    heading: f64,
}

impl Pose {
    fn of(actor: &ActorState) -> Self {
        Self {
            position: actor.position(),
            heading: actor.heading,
        }
    }
}

pub struct StateFlow {
    params: FlowParams,
    state: DrivingState,
    output: FlowOutput,
    entered_at: f64,
    entry_pose: Option<Pose>,
    entry_lane: Option<LaneId>,
    lane_change_side: LaneSide,
    last_speed: Option<f64>,
    rising: u32,
    falling: u32,
}

impl Default for StateFlow {
    fn default() -> Self {
        Self::new(FlowParams::default())
    }
}

impl StateFlow {
    pub fn new(params: FlowParams) -> Self {
        Self {
            params,
            state: DrivingState::Stopped,
            output: FlowOutput::ongoing(Behavior::Stopped),
            entered_at: 0.0,
            entry_pose: None,
            entry_lane: None,
            lane_change_side: LaneSide::Left,
            last_speed: None,
            rising: 0,
            falling: 0,
        }
    }

    pub fn state(&self) -> DrivingState {
        self.state
    }

    pub fn output(&self) -> FlowOutput {
        self.output
    }

    /// Advance one tick and return its behaviour.
    pub fn update(&mut self, time_s: f64, ego: &ActorState, map: Option<&MapInfo>) -> FlowOutput {
        let speed = ego.speed.abs();
        let in_junction = map.is_some_and(|m| m.in_junction);
        let dashed = map.and_then(|m| m.on_dashed_line);
        let lane = map.and_then(|m| m.lane).or(ego.lane);

        match self.state {
            DrivingState::Stopped => {
                if speed > self.params.stop_speed {
                    let next = if ego.is_reversing() {
                        DrivingState::Reversing
                    } else {
                        DrivingState::Driving
                    };
                    self.switch(next, time_s, ego, lane);
                    self.output = FlowOutput::ongoing(match next {
                        DrivingState::Reversing => Behavior::Reversing,
                        _ => Behavior::Driving,
                    });
                } else {
                    self.output = FlowOutput::ongoing(self.stopped_behavior(speed));
                }
            }
            DrivingState::Driving => {
                self.output = FlowOutput::ongoing(Behavior::Driving);
                if speed < self.params.stop_speed {
                    self.switch(DrivingState::Stopped, time_s, ego, lane);
                } else if in_junction {
                    self.switch(DrivingState::InJunction, time_s, ego, lane);
                } else if let Some(side) = dashed {
                    self.lane_change_side = side;
                    self.switch(DrivingState::LaneChanging, time_s, ego, lane);
                }
            }
            DrivingState::LaneChanging => {
                if let Some(side) = dashed {
                    self.lane_change_side = side;
                }
                let behavior = match self.lane_change_side {
                    LaneSide::Left => Behavior::LaneChangeLeft,
                    LaneSide::Right => Behavior::LaneChangeRight,
                };
                self.output = FlowOutput::ongoing(behavior);
                if dashed.is_none() || in_junction {
                    let changed = matches!((self.entry_lane, lane), (Some(a), Some(b)) if a != b);
                    if changed {
                        self.output = FlowOutput {
                            behavior,
                            completed: true,
                            duration_s: time_s - self.entered_at,
                        };
                    }
                    self.switch(DrivingState::Driving, time_s, ego, lane);
                }
            }
            DrivingState::InJunction => {
                self.output = FlowOutput::ongoing(Behavior::Driving);
                let road_changed = matches!((self.entry_lane, lane), (Some(a), Some(b)) if a.road != b.road);
                if !in_junction || road_changed {
                    let same_lane = matches!((self.entry_lane, lane), (Some(a), Some(b)) if a == b);
                    if !same_lane {
                        let behavior = self.junction_behavior(ego);
                        self.output = FlowOutput {
                            behavior,
                            completed: true,
                            duration_s: time_s - self.entered_at,
                        };
                    }
                    self.switch(DrivingState::Driving, time_s, ego, lane);
                }
            }
            DrivingState::Reversing => {
                self.output = FlowOutput::ongoing(Behavior::Reversing);
                if speed < self.params.stop_speed {
                    self.switch(DrivingState::Stopped, time_s, ego, lane);
                }
            }
        }
        self.last_speed = Some(speed);
        self.output
    }

    fn switch(&mut self, next: DrivingState, time_s: f64, ego: &ActorState, lane: Option<LaneId>) {
        debug!(t = time_s, from = ?self.state, to = ?next, "ego state switch");
        self.state = next;
        self.entered_at = time_s;
        self.entry_pose = Some(Pose::of(ego));
        self.entry_lane = lane;
        self.rising = 0;
        self.falling = 0;
    }

    fn stopped_behavior(&mut self, speed: f64) -> Behavior {
        match self.last_speed {
            Some(last) if speed > last => {
                self.rising += 1;
                self.falling = 0;
            }
            Some(last) if speed < last => {
                self.falling += 1;
                self.rising = 0;
            }
            _ => {}
        }
        if speed < self.params.standstill_speed {
            Behavior::Stopped
        } else if self.rising >= self.params.monotonic_samples {
            Behavior::StartUp
        } else if self.falling >= self.params.monotonic_samples {
            Behavior::Stopping
        } else {
            Behavior::Crawling
        }
    }

    /// Classify a junction crossing by the heading change, then by where the
    /// exit lies relative to the entry pose.
    fn junction_behavior(&self, ego: &ActorState) -> Behavior {
        let Some(entry) = self.entry_pose else {
            return Behavior::Driving;
        };
        let p = &self.params;
        let yaw = yaw_diff(ego.heading, entry.heading);
        let offset = to_body_frame(entry.position, entry.heading, ego.position());
        let bearing = offset.y.atan2(offset.x);

        if yaw >= p.u_turn_angle {
            Behavior::UTurnLeft
        } else if yaw >= p.turn_angle {
            Behavior::TurnLeft
        } else if yaw <= -p.u_turn_angle {
            Behavior::UTurnRight
        } else if yaw <= -p.turn_angle {
            Behavior::TurnRight
        } else if offset.norm() > 0.0 && bearing >= p.turn_angle {
            Behavior::TurnLeft
        } else if offset.norm() > 0.0 && bearing <= -p.turn_angle {
            Behavior::TurnRight
        } else {
            Behavior::Driving
        }
    }
}
