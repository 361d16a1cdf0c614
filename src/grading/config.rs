//! KPI and engine configuration
//!
//! Two files drive a run:
//! - a KPI group (JSON, or TOML by extension) listing one [`KpiDefinition`]
//!   per rule with its pass/finish conditions and named thresholds
//! - optional engine [`EvalSettings`] (TOML)

use crate::grading::detector::Bound;
use crate::grading::error::ConfigError;
use crate::grading::verdict::ScoreMap1D;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

// =============================================================================
// THRESHOLD VALUES
// =============================================================================

/// A configured threshold. Files written by hand mix numbers, booleans and
/// numeric strings, so all three are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl ThresholdValue {
    /// Numeric view. Booleans map to 1/0; strings must parse.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Bound view. Words like "unbounded" and the legacy integer sentinels
    /// both mean "no bound on this side".
    pub fn as_bound(&self) -> Option<Bound> {
        if let Self::Text(s) = self {
            let word = s.trim().to_ascii_lowercase();
            if matches!(word.as_str(), "unbounded" | "inf" | "-inf" | "none" | "") {
                return Some(Bound::Unbounded);
            }
        }
        self.as_f64().map(Bound::from_value)
    }
}

impl fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", v),
            Self::Flag(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// KPI DEFINITION
// =============================================================================

/// Direction of the pass-condition comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PassRelation {
    /// FAIL when the detected count reaches the condition value.
    #[default]
    #[serde(rename = ">=")]
    AtLeast,
    /// FAIL when fewer events than the condition value were detected.
    #[serde(rename = "<")]
    Fewer,
}

impl PassRelation {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::AtLeast => ">=",
            Self::Fewer => "<",
        }
    }
}

/// Descriptive metadata copied into the report case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Unit per threshold key, shown in the threshold summary.
    #[serde(default)]
    pub units: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// One rule's configuration. Immutable after Init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiDefinition {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Count threshold governing the final verdict.
    #[serde(default)]
    pub pass_condition: f64,

    #[serde(default)]
    pub pass_relation: PassRelation,

    /// Count threshold governing the early-stop vote.
    #[serde(default)]
    pub finish_condition: f64,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdValue>,

    #[serde(default)]
    pub info: KpiInfo,

    #[serde(default)]
    pub score_map: Option<ScoreMap1D>,

    /// When false the KPI reports but does not take part in the verdict.
    #[serde(default = "default_true")]
    pub result_check: bool,
}

impl KpiDefinition {
    /// Minimal enabled definition, mostly for tests and programmatic setups.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            pass_condition: 0.0,
            pass_relation: PassRelation::AtLeast,
            finish_condition: 0.0,
            thresholds: BTreeMap::new(),
            info: KpiInfo::default(),
            score_map: None,
            result_check: true,
        }
    }

    pub fn with_pass_condition(mut self, value: f64) -> Self {
        self.pass_condition = value;
        self
    }

    pub fn with_finish_condition(mut self, value: f64) -> Self {
        self.finish_condition = value;
        self
    }

    pub fn with_relation(mut self, relation: PassRelation) -> Self {
        self.pass_relation = relation;
        self
    }

    pub fn with_threshold(mut self, key: impl Into<String>, value: ThresholdValue) -> Self {
        self.thresholds.insert(key.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn malformed(&self, key: &str, value: &ThresholdValue) -> ConfigError {
        ConfigError::MalformedThreshold {
            kpi: self.name.clone(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Required numeric threshold.
    pub fn threshold(&self, key: &str) -> Result<f64, ConfigError> {
        let raw = self
            .thresholds
            .get(key)
            .ok_or_else(|| ConfigError::MissingThreshold {
                kpi: self.name.clone(),
                key: key.to_string(),
            })?;
        raw.as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.malformed(key, raw))
    }

    /// Optional numeric threshold. A present but malformed value is still an error.
    pub fn threshold_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.thresholds.get(key) {
            None => Ok(default),
            Some(_) => self.threshold(key),
        }
    }

    /// Bound threshold; an absent key means no bound on that side.
    pub fn bound(&self, key: &str) -> Result<Bound, ConfigError> {
        match self.thresholds.get(key) {
            None => Ok(Bound::Unbounded),
            Some(raw) => raw.as_bound().ok_or_else(|| self.malformed(key, raw)),
        }
    }

    /// `key:value unit;` pairs, trailing separator dropped.
    pub fn threshold_info(&self) -> String {
        self.thresholds
            .iter()
            .map(|(key, value)| {
                let unit = self
                    .info
                    .units
                    .get(key)
                    .filter(|u| u.as_str() != "N/A")
                    .map(String::as_str)
                    .unwrap_or("");
                format!("{}:{}{}", key, value, unit)
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Human-readable pass condition for the report.
    pub fn pass_condition_desc(&self) -> String {
        format!(
            "detected count {} {}",
            self.pass_relation.symbol(),
            self.pass_condition
        )
    }
}

// =============================================================================
// KPI GROUP
// =============================================================================

/// Ordered KPI list for one scenario run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiGroup {
    #[serde(default)]
    pub kpis: Vec<KpiDefinition>,
}

impl KpiGroup {
    /// Load from JSON, or TOML when the extension is `.toml`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading kpi group {}", path.display()))?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let group: Self = if is_toml {
            toml::from_str(&contents)
                .with_context(|| format!("parsing kpi group {}", path.display()))?
        } else {
            Self::from_json_str(&contents)
                .with_context(|| format!("parsing kpi group {}", path.display()))?
        };
        Ok(group)
    }

    pub fn from_json_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn get(&self, name: &str) -> Option<&KpiDefinition> {
        self.kpis.iter().find(|k| k.name == name)
    }

    pub fn enabled_count(&self) -> usize {
        self.kpis.iter().filter(|k| k.enabled).count()
    }
}

// =============================================================================
// ENGINE SETTINGS
// =============================================================================

/// Engine-wide settings shared by every evaluator of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Build report artifacts while stepping.
    #[serde(default = "default_true")]
    pub report_enabled: bool,

    /// Duration assumed for the first tick (seconds).
    #[serde(default = "default_step_s")]
    pub default_step_s: f64,

    /// Scene name recorded in the report.
    #[serde(default)]
    pub scene_name: String,

    /// Speed limit used when the map has none for the ego lane (m/s).
    #[serde(default = "default_speed_limit_mps")]
    pub default_speed_limit_mps: f64,

    /// End the replay early when a KPI votes to stop.
    #[serde(default = "default_true")]
    pub honor_stop_votes: bool,
}

fn default_step_s() -> f64 {
    0.01
}

fn default_speed_limit_mps() -> f64 {
    20.0
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            report_enabled: true,
            default_step_s: default_step_s(),
            scene_name: String::new(),
            default_speed_limit_mps: default_speed_limit_mps(),
            honor_stop_votes: true,
        }
    }
}

impl EvalSettings {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&contents)?;
        Ok(settings)
    }

    /// Load from environment or default path
    pub fn from_env() -> Self {
        let path = std::env::var("KPI_EVAL_CONFIG_PATH")
            .unwrap_or_else(|_| "kpi_eval.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default eval settings ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_json() {
        let json = r#"{
            "kpis": [
                {
                    "name": "MaxSpeed",
                    "passCondition": 1,
                    "finishCondition": 0,
                    "thresholds": {"Speed_H": "30", "Spare": 2.5},
                    "info": {"category": "speed", "units": {"Speed_H": "m/s"}}
                },
                {
                    "name": "ManualTakeover",
                    "enabled": false,
                    "passCondition": 1,
                    "passRelation": "<"
                }
            ]
        }"#;
        let group = KpiGroup::from_json_str(json).unwrap();
        assert_eq!(group.kpis.len(), 2);
        assert_eq!(group.enabled_count(), 1);

        let speed = group.get("MaxSpeed").unwrap();
        assert!(speed.enabled);
        assert!(speed.result_check);
        assert_eq!(speed.threshold("Speed_H").unwrap(), 30.0);
        assert_eq!(speed.threshold_info(), "Spare:2.5;Speed_H:30m/s");

        let takeover = group.get("ManualTakeover").unwrap();
        assert_eq!(takeover.pass_relation, PassRelation::Fewer);
        assert_eq!(takeover.pass_condition_desc(), "detected count < 1");
    }

    #[test]
    fn test_missing_and_malformed_thresholds() {
        let def = KpiDefinition::new("X")
            .with_threshold("Bad", ThresholdValue::Text("fast".into()));
        assert_eq!(
            def.threshold("Absent"),
            Err(ConfigError::MissingThreshold {
                kpi: "X".into(),
                key: "Absent".into()
            })
        );
        assert!(matches!(
            def.threshold("Bad"),
            Err(ConfigError::MalformedThreshold { .. })
        ));
        assert_eq!(def.threshold_or("Absent", 1.5).unwrap(), 1.5);
        assert!(def.threshold_or("Bad", 1.5).is_err());
    }

    #[test]
    fn test_bound_sentinels() {
        let def = KpiDefinition::new("Acc")
            .with_threshold("Lo", ThresholdValue::Number(-2147483648.0))
            .with_threshold("Hi", ThresholdValue::Text("unbounded".into()))
            .with_threshold("Zero", ThresholdValue::Number(0.0));
        assert_eq!(def.bound("Lo").unwrap(), Bound::Unbounded);
        assert_eq!(def.bound("Hi").unwrap(), Bound::Unbounded);
        assert_eq!(def.bound("Missing").unwrap(), Bound::Unbounded);
        assert_eq!(def.bound("Zero").unwrap(), Bound::At(0.0));
    }

    #[test]
    fn test_group_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.toml");
        std::fs::write(
            &path,
            r#"
[[kpis]]
name = "MaxSpeed"
passCondition = 1.0

[kpis.thresholds]
Speed_H = 30.0
"#,
        )
        .unwrap();
        let group = KpiGroup::load(&path).unwrap();
        assert_eq!(group.kpis[0].threshold("Speed_H").unwrap(), 30.0);
    }

    #[test]
    fn test_settings_defaults_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut settings = EvalSettings::default();
        settings.scene_name = "cut_in".into();
        settings.save(&path).unwrap();

        let loaded = EvalSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);

        let partial: EvalSettings = toml::from_str("report_enabled = false").unwrap();
        assert!(!partial.report_enabled);
        assert_eq!(partial.default_speed_limit_mps, 20.0);
    }
}
