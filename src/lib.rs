//! Scenario KPI Library
//!
//! Exposes the grading engine for use by binaries and tests.

pub mod grading;

pub use grading::{KpiGroup, ScenarioReport, ScenarioRunner};
