//! Scenario KPI Grading
//!
//! Per-tick evaluation of driving-scenario KPIs against simulated telemetry,
//! with pass/fail verdicts, early-stop votes and structured report artifacts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       ScenarioRunner                            │
//! │  (owns TickClock, replays frames, honors stop votes)            │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │ TickContext
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                              │
//! │  step all (registration order) ─▶ collect votes ─▶ signal stop  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │RuleEvaluator│        │RuleEvaluator│  ...   │RuleEvaluator│
//! │ <MaxSpeed>  │        │ <Collision> │        │    <R>      │
//! └──────┬──────┘        └──────┬──────┘        └──────┬──────┘
//!        │ Detect               │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ Threshold   │        │ EdgeLatch / │        │ Report      │
//! │ Detector    │        │ Duration    │        │ Builder     │
//! └─────────────┘        └─────────────┘        └──────┬──────┘
//!                                                      │ stop
//!                                                      ▼
//!                        ┌─────────────┐        ┌─────────────┐
//!                        │  Verdict    │───────▶│ Scenario    │
//!                        │ Aggregator  │        │ Report      │
//!                        └─────────────┘        └─────────────┘
//! ```
//!
//! # Determinism
//!
//! Evaluators are stepped sequentially on one thread and own all of their
//! state. Replaying the same frames with the same configuration yields the
//! same counts, verdicts and series.

pub mod clock;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod geometry;
pub mod kpis;
pub mod registry;
pub mod replay;
pub mod report;
pub mod ring_buffer;
pub mod sink;
pub mod state_flow;
pub mod telemetry;
pub mod verdict;

#[cfg(test)]
mod detector_tests;
#[cfg(test)]
mod dispatcher_tests;
#[cfg(test)]
mod evaluator_tests;

pub use clock::{Nanos, TickClock};
pub use config::{EvalSettings, KpiDefinition, KpiGroup, PassRelation, ThresholdValue};
pub use detector::{Bound, DurationAccumulator, EdgeLatch, LatchTransition, ThresholdDetector, Trigger};
pub use dispatcher::{Dispatcher, ScenarioControl, StopFlag, StopRequest, TickOutcome};
pub use error::{ConfigError, ReportError, SkipReason, StepError};
pub use evaluator::{KpiEvaluator, KpiRule, Lifecycle, Outcome, RuleEvaluator};
pub use registry::{available_kpis, make_kpi, KpiRegistry};
pub use replay::{load_frames, ScenarioFrame, ScenarioRunner};
pub use report::{Attachment, KpiCase, ReportBuilder, ScenarioReport, XYPlot};
pub use sink::{MemorySink, ReportSink};
pub use state_flow::{Behavior, DrivingState, FlowOutput, FlowParams, StateFlow};
pub use telemetry::{ActorKind, ActorState, MapInfo, MessageBuffer, MessageBus, TickContext};
pub use verdict::{KpiResult, ScenarioVerdict, Verdict, VerdictAggregator};
