//! Scenario Replay
//!
//! Stands in for the scenario orchestrator: reads recorded frames, derives
//! tick time from a monotonic clock, dispatches every tick and assembles the
//! final report.
//!
//! Frames are JSON Lines, one object per tick:
//!
//! ```text
//! {"timeMs": 0,  "ego": {"id": 0, "x": 0, "y": 0, "speed": 10}, "fellows": [], "messages": {}}
//! {"timeMs": 10, "ego": {"id": 0, "x": 0.1, "y": 0, "speed": 10.2}, "messages": {"CHASSIS": {"takeover": false}}}
//! ```

use crate::grading::clock::{millis_to_nanos, nanos_to_secs, Nanos, TickClock};
use crate::grading::config::{EvalSettings, KpiGroup};
use crate::grading::dispatcher::{Dispatcher, InitReport, StopFlag, TickOutcome};
use crate::grading::error::ConfigError;
use crate::grading::registry::KpiRegistry;
use crate::grading::report::{RunMeta, ScenarioReport};
use crate::grading::sink::MemorySink;
use crate::grading::telemetry::{ActorState, MapInfo, MessageBuffer, TickContext};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

// =============================================================================
// FRAMES
// =============================================================================

/// Owned telemetry of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioFrame {
    /// Simulation time (ms).
    pub time_ms: f64,
    #[serde(default)]
    pub ego: Option<ActorState>,
    /// Trailer towed by the ego.
    #[serde(default)]
    pub trailer: Option<ActorState>,
    #[serde(default)]
    pub fellows: Vec<ActorState>,
    #[serde(default)]
    pub map: Option<MapInfo>,
    /// Bus payloads by topic, re-encoded as JSON bytes for the tick.
    #[serde(default)]
    pub messages: BTreeMap<String, serde_json::Value>,
}

impl ScenarioFrame {
    pub fn at(time_ms: f64) -> Self {
        Self {
            time_ms,
            ..Self::default()
        }
    }

    pub fn with_ego(mut self, ego: ActorState) -> Self {
        self.ego = Some(ego);
        self
    }

    pub fn with_trailer(mut self, trailer: ActorState) -> Self {
        self.trailer = Some(trailer);
        self
    }

    pub fn with_fellow(mut self, fellow: ActorState) -> Self {
        self.fellows.push(fellow);
        self
    }

    pub fn with_map(mut self, map: MapInfo) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_message(mut self, topic: impl Into<String>, payload: serde_json::Value) -> Self {
        self.messages.insert(topic.into(), payload);
        self
    }

    fn bus(&self) -> MessageBuffer {
        let mut bus = MessageBuffer::new();
        for (topic, payload) in &self.messages {
            if let Err(e) = bus.insert_json(topic.as_str(), payload) {
                warn!(topic = %topic, error = %e, "dropping unencodable payload");
            }
        }
        bus
    }
}

/// Parse JSON Lines frames. Blank lines are ignored.
pub fn parse_frames(contents: &str) -> anyhow::Result<Vec<ScenarioFrame>> {
    read_frames(contents.as_bytes())
}

/// Load JSON Lines frames from a file.
pub fn load_frames(path: impl AsRef<Path>) -> anyhow::Result<Vec<ScenarioFrame>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening frames {}", path.display()))?;
    read_frames(BufReader::new(file)).with_context(|| format!("reading frames {}", path.display()))
}

fn read_frames(reader: impl BufRead) -> anyhow::Result<Vec<ScenarioFrame>> {
    let mut frames = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: ScenarioFrame = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid frame", idx + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

// =============================================================================
// RUNNER
// =============================================================================

/// One scenario run over recorded frames.
pub struct ScenarioRunner {
    dispatcher: Dispatcher,
    clock: TickClock,
    control: StopFlag,
    sink: MemorySink,
    started_at: DateTime<Utc>,
    first_time: Option<Nanos>,
    initialized: bool,
}

impl ScenarioRunner {
    pub fn new(registry: KpiRegistry, settings: EvalSettings) -> Self {
        let clock = TickClock::new(settings.default_step_s);
        Self {
            dispatcher: Dispatcher::new(registry, settings),
            clock,
            control: StopFlag::new(),
            sink: MemorySink::new(),
            started_at: Utc::now(),
            first_time: None,
            initialized: false,
        }
    }

    /// Build the registry from `group`; rejected definitions are returned.
    pub fn from_group(group: &KpiGroup, settings: EvalSettings) -> (Self, Vec<ConfigError>) {
        let (registry, rejected) = KpiRegistry::from_group(group);
        (Self::new(registry, settings), rejected)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn init(&mut self) -> InitReport {
        self.initialized = true;
        self.started_at = Utc::now();
        self.dispatcher.init_all()
    }

    /// Whether a stop vote has ended the run.
    pub fn is_stopped(&self) -> bool {
        self.dispatcher.settings().honor_stop_votes && self.control.is_set()
    }

    /// Dispatch one frame as the next tick.
    pub fn feed(&mut self, frame: &ScenarioFrame) -> TickOutcome {
        if !self.initialized {
            self.init();
        }
        let time = millis_to_nanos(frame.time_ms);
        self.first_time.get_or_insert(time);
        let dt_s = self.clock.advance_to_secs(time);
        let bus = frame.bus();
        let tick = TickContext::new(self.dispatcher.ticks(), self.clock.now(), dt_s, &bus)
            .with_ego(frame.ego.as_ref())
            .with_trailer(frame.trailer.as_ref())
            .with_fellows(&frame.fellows)
            .with_map(frame.map.as_ref());
        self.dispatcher.step(&tick, &mut self.control)
    }

    /// Feed frames until they run out or a stop vote is honored.
    pub fn run<I>(mut self, frames: I) -> ScenarioReport
    where
        I: IntoIterator<Item = ScenarioFrame>,
    {
        if !self.initialized {
            self.init();
        }
        for frame in frames {
            if self.is_stopped() {
                break;
            }
            self.feed(&frame);
        }
        self.finish()
    }

    /// Stop every evaluator and assemble the report.
    pub fn finish(mut self) -> ScenarioReport {
        let verdict = self.dispatcher.finish(&mut self.sink);
        let sim_duration_s = self
            .first_time
            .map(|t0| nanos_to_secs(self.clock.now() - t0))
            .unwrap_or(0.0);
        let meta = RunMeta {
            scene_name: self.dispatcher.settings().scene_name.clone(),
            started_at: self.started_at,
            ticks: self.dispatcher.ticks(),
            sim_duration_s,
            stop_reason: self.control.request().map(|r| r.reason()),
        };
        info!(
            scene = %meta.scene_name,
            ticks = meta.ticks,
            sim_duration_s,
            passed = verdict.passed,
            "scenario finished"
        );
        ScenarioReport::assemble(meta, self.sink.into_cases(), &verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::telemetry::ActorKind;

    #[test]
    fn test_parse_frames_skips_blank_lines() {
        let contents = r#"
{"timeMs": 0, "ego": {"id": 0, "x": 0, "y": 0, "speed": 10}}

{"timeMs": 10, "ego": {"id": 0, "x": 0.1, "y": 0, "speed": 11}, "messages": {"CHASSIS": {"takeover": true}}}
"#;
        let frames = parse_frames(contents).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].time_ms, 10.0);
        assert_eq!(frames[1].ego.as_ref().map(|e| e.speed), Some(11.0));
        assert!(frames[1].messages.contains_key("CHASSIS"));
    }

    #[test]
    fn test_parse_frames_reports_line() {
        let err = parse_frames("{\"timeMs\": 0}\nnot json\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_frame_bus_encodes_messages() {
        let frame = ScenarioFrame::at(0.0)
            .with_message("CHASSIS", serde_json::json!({"takeover": true}));
        let bus = frame.bus();
        let bytes = crate::grading::telemetry::MessageBus::get(&bus, "CHASSIS").unwrap();
        let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(value["takeover"], true);
    }

    #[test]
    fn test_frame_builder() {
        let frame = ScenarioFrame::at(20.0)
            .with_ego(ActorState::new(0, ActorKind::Ego, 0.0, 0.0))
            .with_fellow(ActorState::new(1, ActorKind::Vehicle, 10.0, 0.0));
        assert_eq!(frame.fellows.len(), 1);
        assert!(frame.map.is_none());
    }
}
