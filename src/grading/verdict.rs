//! Verdict Aggregation
//!
//! Turns detected counts into per-KPI verdicts and folds those into a
//! scenario verdict.
//!
//! # Condition Rule
//!
//! A condition value below 0.5 disables the rule's ability to fail or vote:
//!
//! ```text
//! FAIL  iff  count >= value  AND  value >= 0.5     (relation ">=")
//! FAIL  iff  count <  value  AND  value >= 0.5     (relation "<")
//! STOP  iff  count >= finish AND  finish >= 0.5
//! ```

use crate::grading::config::{KpiDefinition, PassRelation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest condition value that can ever fail a rule.
pub const MIN_ACTIVE_CONDITION: f64 = 0.5;

/// Test a count against a configured condition value.
pub fn condition_met(count: u64, value: f64, relation: PassRelation) -> bool {
    if !(value >= MIN_ACTIVE_CONDITION) {
        return false;
    }
    let count = count as f64;
    match relation {
        PassRelation::AtLeast => count >= value,
        PassRelation::Fewer => count < value,
    }
}

/// Early-stop vote test. Always compares "at least".
#[inline]
pub fn stop_condition_met(count: u64, finish_condition: f64) -> bool {
    condition_met(count, finish_condition, PassRelation::AtLeast)
}

// =============================================================================
// PER-KPI RESULT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    Skipped,
    /// Report-only KPI, excluded from the scenario verdict.
    Undefined,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Skipped => "SKIPPED",
            Verdict::Undefined => "UNDEFINED",
        };
        f.pad(s)
    }
}

/// Outcome of one KPI at scenario end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiResult {
    pub name: String,
    pub verdict: Verdict,
    pub reason: String,
    pub detected_count: u64,
    pub pass_condition: f64,
    pub relation: PassRelation,
    /// Score looked up from the configured score map, if any.
    pub score: Option<f64>,
}

impl KpiResult {
    /// Apply the condition rule to `detected_count`.
    pub fn judge(def: &KpiDefinition, detected_count: u64, fail_reason: &str, pass_reason: &str) -> Self {
        let verdict = if !def.result_check {
            Verdict::Undefined
        } else if condition_met(detected_count, def.pass_condition, def.pass_relation) {
            Verdict::Fail
        } else {
            Verdict::Pass
        };
        let reason = match verdict {
            Verdict::Fail => fail_reason,
            _ => pass_reason,
        };
        Self {
            name: def.name.clone(),
            verdict,
            reason: reason.to_string(),
            detected_count,
            pass_condition: def.pass_condition,
            relation: def.pass_relation,
            score: def
                .score_map
                .as_ref()
                .and_then(|m| m.lookup(detected_count as f64)),
        }
    }

    /// Result for a KPI that never evaluated.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::Skipped,
            reason: reason.into(),
            detected_count: 0,
            pass_condition: 0.0,
            relation: PassRelation::AtLeast,
            score: None,
        }
    }

    #[inline]
    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}

// =============================================================================
// SCORE MAP
// =============================================================================

/// Piecewise-linear score over the detected count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreMap1D {
    pub u: Vec<f64>,
    pub y: Vec<f64>,
}

impl ScoreMap1D {
    pub fn new(u: Vec<f64>, y: Vec<f64>) -> Self {
        Self { u, y }
    }

    /// At least two points, matching lengths, strictly increasing `u`.
    pub fn validate(&self) -> Result<(), String> {
        if self.u.len() < 2 {
            return Err(format!("need at least 2 points, got {}", self.u.len()));
        }
        if self.u.len() != self.y.len() {
            return Err(format!(
                "u has {} points, y has {}",
                self.u.len(),
                self.y.len()
            ));
        }
        if self.u.windows(2).any(|w| !(w[1] > w[0])) {
            return Err("u must be strictly increasing".to_string());
        }
        Ok(())
    }

    /// Clamp outside the table, interpolate inside. `None` for an invalid map.
    pub fn lookup(&self, x: f64) -> Option<f64> {
        self.validate().ok()?;
        let last = self.u.len() - 1;
        if x <= self.u[0] {
            return Some(self.y[0]);
        }
        if x >= self.u[last] {
            return Some(self.y[last]);
        }
        let right = self.u.partition_point(|&u| u <= x).min(last);
        let left = right - 1;
        let (u0, u1) = (self.u[left], self.u[right]);
        let (y0, y1) = (self.y[left], self.y[right]);
        Some((y1 - y0) * (x - u0) / (u1 - u0) + y0)
    }
}

// =============================================================================
// SCENARIO VERDICT
// =============================================================================

/// Case counts by verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub undefined: usize,
}

impl CaseSummary {
    fn record(&mut self, verdict: Verdict) {
        self.total += 1;
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Fail => self.failed += 1,
            Verdict::Skipped => self.skipped += 1,
            Verdict::Undefined => self.undefined += 1,
        }
    }

    /// Add the counts of another run.
    pub fn merge(&mut self, other: &CaseSummary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.undefined += other.undefined;
    }
}

/// Overall outcome of a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioVerdict {
    pub passed: bool,
    /// Reasons of failing KPIs joined with ';'. Empty on pass.
    pub reason: String,
    pub summary: CaseSummary,
    pub results: Vec<KpiResult>,
}

impl ScenarioVerdict {
    pub fn verdict(&self) -> Verdict {
        if self.passed {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn result(&self, name: &str) -> Option<&KpiResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Stateless fold over per-KPI results.
pub struct VerdictAggregator;

impl VerdictAggregator {
    /// The scenario fails iff any KPI fails.
    pub fn aggregate(results: Vec<KpiResult>) -> ScenarioVerdict {
        let mut summary = CaseSummary::default();
        let mut reasons: Vec<&str> = Vec::new();
        for result in &results {
            summary.record(result.verdict);
            if result.is_fail() {
                reasons.push(result.reason.as_str());
            }
        }
        let reason = reasons.join(";");
        ScenarioVerdict {
            passed: summary.failed == 0,
            reason,
            summary,
            results,
        }
    }
}
