//! Traffic-rule compliance.
//!
//! Four checks feed one violation counter:
//!
//! - **Speeding**: above the lane limit for at least 1 s. Penalty points are
//!   graded by how far the limit is exceeded and repeat every 5 s of a run.
//! - **Solid line**: the ego box reaches a solid lane marking.
//! - **Red light**: the ego enters a junction while its lane shows red. The
//!   penalty is 2 points if it then stops inside the junction, 6 if it drives
//!   through.
//! - **Wrong lane**: the movement through a junction (from the
//!   [`StateFlow`]) is not one the entry lane allows. Lanes without link data
//!   are not checked.
//!
//! The detector is called once per violation, on the tick it is established.
//! A speeding run is a violation as soon as it lasts 1 s, so a run still open
//! at stop is counted.

use crate::grading::config::{EvalSettings, KpiDefinition};
use crate::grading::detector::{EdgeLatch, LatchTransition, ThresholdDetector};
use crate::grading::error::{ConfigError, StepError};
use crate::grading::evaluator::KpiRule;
use crate::grading::report::{PlotId, ReportBuilder, XYPlot, YAxis};
use crate::grading::state_flow::StateFlow;
use crate::grading::telemetry::{MapInfo, SignalColor, TickContext, TurnDirection};
use std::fmt;
use tracing::info;

/// Shortest speeding run that is a violation (s).
pub const MIN_SPEEDING_RUN_S: f64 = 1.0;
/// An open speeding run is penalised again every period (s).
pub const SPEEDING_PENALTY_PERIOD_S: f64 = 5.0;
/// Inside a junction at or below this speed, a red-light runner has stopped (m/s).
pub const RED_LIGHT_STOP_SPEED: f64 = 0.56;

pub const SOLID_LINE_PENALTY: u32 = 2;
pub const WRONG_LANE_PENALTY: u32 = 2;
pub const RED_LIGHT_STOPPED_PENALTY: u32 = 2;
pub const RED_LIGHT_PASSED_PENALTY: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    Speeding,
    SolidLine,
    RedLight,
    WrongLane,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::Speeding => "over speed",
            ViolationKind::SolidLine => "solid line",
            ViolationKind::RedLight => "red light",
            ViolationKind::WrongLane => "wrong lane",
        };
        f.write_str(s)
    }
}

// =============================================================================
// SPEEDING
// =============================================================================

/// How far a speeding run exceeds the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SpeedingGrade {
    /// Up to 30% over.
    #[default]
    Over0,
    /// 30% to 50% over.
    Over30,
    /// More than 50% over.
    Over50,
}

impl SpeedingGrade {
    pub fn of(speed: f64, limit: f64) -> Self {
        let ratio = speed / limit;
        if ratio > 1.5 {
            SpeedingGrade::Over50
        } else if ratio > 1.3 {
            SpeedingGrade::Over30
        } else {
            SpeedingGrade::Over0
        }
    }

    pub fn penalty(&self) -> u32 {
        match self {
            SpeedingGrade::Over0 => 3,
            SpeedingGrade::Over30 => 6,
            SpeedingGrade::Over50 => 12,
        }
    }
}

/// What one speeding update produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeedingUpdate {
    /// The run just reached [`MIN_SPEEDING_RUN_S`].
    pub violation: bool,
    pub penalty: u32,
}

/// Tracks one speeding run at a time.
#[derive(Debug, Clone, Default)]
pub struct SpeedingMonitor {
    active: bool,
    elapsed_s: f64,
    /// Penalty periods started, including the first.
    periods: u32,
    counted: bool,
    grade: SpeedingGrade,
}

impl SpeedingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, speed: f64, limit: f64, dt_s: f64) -> SpeedingUpdate {
        let mut out = SpeedingUpdate::default();
        if speed > limit {
            if !self.active {
                self.active = true;
                self.periods = 1;
            } else if self.elapsed_s >= SPEEDING_PENALTY_PERIOD_S * self.periods as f64 {
                out.penalty = self.grade.penalty();
                self.periods += 1;
            }
            self.elapsed_s += dt_s.max(0.0);
            self.grade = SpeedingGrade::of(speed, limit);
            if !self.counted && self.elapsed_s >= MIN_SPEEDING_RUN_S {
                self.counted = true;
                out.violation = true;
            }
        } else if self.active {
            out.penalty = self.close();
        }
        out
    }

    /// End the run in progress; returns its closing penalty.
    pub fn close(&mut self) -> u32 {
        let penalty = if self.active
            && self.elapsed_s >= MIN_SPEEDING_RUN_S
            && (self.periods == 1 || self.elapsed_s >= SPEEDING_PENALTY_PERIOD_S * self.periods as f64)
        {
            self.grade.penalty()
        } else {
            0
        };
        *self = Self::default();
        penalty
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Length of the run in progress (s).
    pub fn elapsed(&self) -> f64 {
        self.elapsed_s
    }
}

// =============================================================================
// RULE
// =============================================================================

/// Penalty points per check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplianceScore {
    pub speeding: u32,
    pub solid_line: u32,
    pub red_light: u32,
    pub wrong_lane: u32,
}

impl ComplianceScore {
    pub fn total(&self) -> u32 {
        self.speeding + self.solid_line + self.red_light + self.wrong_lane
    }
}

pub struct Compliance {
    default_limit: f64,
    flow: StateFlow,
    speeding: SpeedingMonitor,
    solid_line: EdgeLatch,
    /// Last light seen before the junction.
    light: Option<SignalColor>,
    ran_red: bool,
    /// Movements allowed by the last lane with link data.
    allowed: Vec<TurnDirection>,
    junction_entry: Option<Vec<TurnDirection>>,
    score: ComplianceScore,
    violations: Vec<ViolationKind>,
    detector: ThresholdDetector,
    fired: bool,
    plot: PlotId,
}

impl Compliance {
    pub fn score(&self) -> ComplianceScore {
        self.score
    }

    pub fn violations(&self) -> &[ViolationKind] {
        &self.violations
    }

    fn violate(&mut self, kind: ViolationKind, t: f64) {
        info!(t, %kind, "traffic rule violation");
        self.violations.push(kind);
        self.detector.detect_flag(true);
        self.fired = true;
    }

    fn check_red_light(&mut self, map: &MapInfo, speed: f64, t: f64) {
        if !map.in_junction {
            if let Some(color) = map.signal {
                self.light = Some(color);
            }
        }
        if !self.ran_red && map.in_junction && self.light == Some(SignalColor::Red) {
            self.ran_red = true;
            self.violate(ViolationKind::RedLight, t);
        }
        if self.ran_red && map.in_junction && speed <= RED_LIGHT_STOP_SPEED {
            self.ran_red = false;
            self.light = None;
            self.score.red_light += RED_LIGHT_STOPPED_PENALTY;
        } else if self.ran_red && !map.in_junction {
            self.ran_red = false;
            self.light = None;
            self.score.red_light += RED_LIGHT_PASSED_PENALTY;
        }
    }

    fn check_lane_movement(&mut self, map: &MapInfo, movement: Option<TurnDirection>, t: f64) {
        if !map.in_junction && !map.allowed_turns.is_empty() {
            self.allowed.clone_from(&map.allowed_turns);
        }
        if map.in_junction {
            if self.junction_entry.is_none() {
                self.junction_entry = Some(self.allowed.clone());
            }
        } else if let Some(entry) = self.junction_entry.take() {
            if !entry.is_empty() && movement.is_some_and(|m| !entry.contains(&m)) {
                self.score.wrong_lane += WRONG_LANE_PENALTY;
                self.violate(ViolationKind::WrongLane, t);
            }
        }
    }
}

impl KpiRule for Compliance {
    const NAME: &'static str = "Compliance";

    fn configure(
        _def: &KpiDefinition,
        settings: &EvalSettings,
        report: &mut ReportBuilder,
    ) -> Result<Self, ConfigError> {
        let plot = report.add_plot(
            XYPlot::over_time("traffic rule compliance")
                .with_y(YAxis::new("violations", ""))
                .with_y(YAxis::new("penalty points", ""))
                .with_y(YAxis::new("speeding points", ""))
                .with_y(YAxis::new("solid line points", ""))
                .with_y(YAxis::new("red light points", ""))
                .with_y(YAxis::new("wrong lane points", "")),
        );
        Ok(Self {
            default_limit: settings.default_speed_limit_mps,
            flow: StateFlow::default(),
            speeding: SpeedingMonitor::new(),
            solid_line: EdgeLatch::new(),
            light: None,
            ran_red: false,
            allowed: Vec::new(),
            junction_entry: None,
            score: ComplianceScore::default(),
            violations: Vec::new(),
            detector: ThresholdDetector::new(),
            fired: false,
            plot,
        })
    }

    fn evaluate(&mut self, tick: &TickContext<'_>, report: &mut ReportBuilder) -> Result<(), StepError> {
        let ego = tick.ego()?;
        let t = tick.time_s();
        let speed = ego.speed.abs();
        self.fired = false;

        let flow = self.flow.update(t, ego, tick.map());
        let default_map = MapInfo::default();
        let map = tick.map().unwrap_or(&default_map);

        let limit = map.speed_limit_or(self.default_limit);
        let speeding = self.speeding.update(speed, limit, tick.dt_s);
        self.score.speeding += speeding.penalty;
        if speeding.violation {
            self.violate(ViolationKind::Speeding, t);
        }

        if self.solid_line.follow(map.on_solid_line) == LatchTransition::Entered {
            self.score.solid_line += SOLID_LINE_PENALTY;
            self.violate(ViolationKind::SolidLine, t);
        }

        self.check_red_light(map, speed, t);
        self.check_lane_movement(map, flow.behavior.junction_movement(), t);

        let s = self.score;
        report.push_values(
            self.plot,
            t,
            &[
                self.detector.count() as f64,
                s.total() as f64,
                s.speeding as f64,
                s.solid_line as f64,
                s.red_light as f64,
                s.wrong_lane as f64,
            ],
        )?;
        Ok(())
    }

    fn finalize(&mut self, report: &mut ReportBuilder) {
        self.score.speeding += self.speeding.close();
        let count = |kind| self.violations.iter().filter(|v| **v == kind).count();
        report.add_pair("penalty points", self.score.total().to_string());
        report.add_pair("over speed violations", count(ViolationKind::Speeding).to_string());
        report.add_pair("solid line violations", count(ViolationKind::SolidLine).to_string());
        report.add_pair("red light violations", count(ViolationKind::RedLight).to_string());
        report.add_pair("wrong lane violations", count(ViolationKind::WrongLane).to_string());
    }

    fn detected_count(&self) -> u64 {
        self.detector.count()
    }

    fn latest_event(&self) -> bool {
        self.fired
    }

    fn fail_reason(&self) -> String {
        let mut kinds: Vec<String> = Vec::new();
        for kind in &self.violations {
            let name = kind.to_string();
            if !kinds.contains(&name) {
                kinds.push(name);
            }
        }
        if kinds.is_empty() {
            "traffic rule violation".to_string()
        } else {
            format!("traffic rule violation ({})", kinds.join(", "))
        }
    }

    fn pass_reason(&self) -> String {
        "traffic rules obeyed".to_string()
    }
}
