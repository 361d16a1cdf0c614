//! Error taxonomy for the evaluation engine.
//!
//! None of these ever escape the dispatcher: configuration errors leave a KPI
//! skipped for the run, skip reasons are tick-local, and report errors are
//! logged at stop time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Malformed or rejected KPI configuration, raised at Init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigError {
    /// A required threshold key is absent.
    MissingThreshold { kpi: String, key: String },
    /// A threshold is present but cannot be used as configured.
    MalformedThreshold {
        kpi: String,
        key: String,
        value: String,
    },
    /// Two definitions share a name within one group.
    DuplicateKpi(String),
    /// No rule is registered under this name.
    UnknownKpi(String),
    /// The evaluator has already left the uninitialized state.
    AlreadyInitialized(String),
    /// Score map must have >= 2 strictly increasing points.
    InvalidScoreMap { kpi: String, detail: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingThreshold { kpi, key } => {
                write!(f, "{}: missing threshold '{}'", kpi, key)
            }
            Self::MalformedThreshold { kpi, key, value } => {
                write!(f, "{}: malformed threshold '{}' = '{}'", kpi, key, value)
            }
            Self::DuplicateKpi(name) => write!(f, "duplicate kpi '{}'", name),
            Self::UnknownKpi(name) => write!(f, "unknown kpi '{}'", name),
            Self::AlreadyInitialized(name) => write!(f, "{}: already initialized", name),
            Self::InvalidScoreMap { kpi, detail } => {
                write!(f, "{}: invalid score map ({})", kpi, detail)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Why a lifecycle call did nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    /// KPI disabled in configuration.
    Disabled,
    /// Init failed; the KPI stays skipped for the run.
    ModuleInvalid,
    /// Called outside the Initialized/Stepping states.
    NotStepping,
    /// A required ego/fellow/map/bus handle is absent this tick.
    MissingTelemetry(String),
    /// A bus payload is present but does not decode.
    PayloadParse { topic: String, detail: String },
}

impl SkipReason {
    /// Tick-local reasons; the next tick retries normally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MissingTelemetry(_) | Self::PayloadParse { .. })
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::ModuleInvalid => write!(f, "module invalid"),
            Self::NotStepping => write!(f, "not in stepping state"),
            Self::MissingTelemetry(what) => write!(f, "missing telemetry: {}", what),
            Self::PayloadParse { topic, detail } => {
                write!(f, "unparsable payload on '{}': {}", topic, detail)
            }
        }
    }
}

impl std::error::Error for SkipReason {}

/// Report assembly and sink failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportError {
    /// A sample did not supply one value per y axis.
    AxisMismatch {
        plot: String,
        expected: usize,
        got: usize,
    },
    /// A finalized series is not aligned with its x axis.
    Misaligned {
        plot: String,
        axis: String,
        x_len: usize,
        y_len: usize,
    },
    /// A row did not supply one cell per column.
    RowWidth {
        sheet: String,
        expected: usize,
        got: usize,
    },
    UnknownHandle(usize),
    Sink(String),
    Serialize(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AxisMismatch { plot, expected, got } => {
                write!(f, "plot '{}': expected {} y values, got {}", plot, expected, got)
            }
            Self::Misaligned {
                plot,
                axis,
                x_len,
                y_len,
            } => write!(
                f,
                "plot '{}': axis '{}' has {} samples, x axis has {}",
                plot, axis, y_len, x_len
            ),
            Self::RowWidth {
                sheet,
                expected,
                got,
            } => write!(f, "sheet '{}': expected {} cells, got {}", sheet, expected, got),
            Self::UnknownHandle(idx) => write!(f, "unknown report handle {}", idx),
            Self::Sink(msg) => write!(f, "report sink failed: {}", msg),
            Self::Serialize(msg) => write!(f, "report serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for ReportError {}

/// Failure inside one rule evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    Skip(SkipReason),
    Report(ReportError),
}

impl From<SkipReason> for StepError {
    fn from(reason: SkipReason) -> Self {
        StepError::Skip(reason)
    }
}

impl From<ReportError> for StepError {
    fn from(err: ReportError) -> Self {
        StepError::Report(err)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(reason) => write!(f, "skipped: {}", reason),
            Self::Report(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for StepError {}
