//! KPI Registry
//!
//! Maps KPI names to rule implementations and holds the ordered evaluator set
//! of one scenario run.
//!
//! # Supported KPIs
//!
//! ## Ego motion
//! - `MaxSpeed` - ego speed against a fixed ceiling
//! - `Acceleration` - longitudinal acceleration band
//! - `OverSpeedDuration` - time spent above the lane speed limit
//! - `SnakeDriving` - serpentine yaw-rate pattern
//!
//! ## Interaction
//! - `FollowStartJerk` - jerk while pulling away behind a leading vehicle
//! - `Collision` - ego or trailer box overlapping any fellow actor, with the
//!   response to each contact
//! - `CollisionPassive` - contacts another actor caused
//!
//! ## Traffic rules
//! - `Compliance` - speeding, solid lines, red lights and junction movements
//!
//! ## Function checks
//! - `ParkingPrecision` - final pose inside the target parking space
//! - `ManualTakeover` - driver takeovers on the chassis topic

use crate::grading::config::{KpiDefinition, KpiGroup};
use crate::grading::error::ConfigError;
use crate::grading::evaluator::{KpiEvaluator, KpiRule, RuleEvaluator};
use crate::grading::kpis::{
    AccelerationBounds, Collision, CollisionPassive, Compliance, FollowStartJerk, ManualTakeover,
    MaxSpeed, OverSpeedDuration, ParkingPrecision, SnakeDriving,
};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Registry of available KPIs with their descriptions.
pub fn available_kpis() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert(MaxSpeed::NAME, "Ego speed reaching the configured maximum");
    map.insert(AccelerationBounds::NAME, "Ego acceleration leaving the configured band");
    map.insert(OverSpeedDuration::NAME, "Ego above the lane speed limit for too long");
    map.insert(SnakeDriving::NAME, "Yaw rate flipping sign too often within a window");
    map.insert(FollowStartJerk::NAME, "Jerk while starting behind a leading vehicle");
    map.insert(Collision::NAME, "Ego bounding box overlapping a fellow actor");
    map.insert(CollisionPassive::NAME, "Contacts caused by another actor");
    map.insert(Compliance::NAME, "Traffic rule violations with penalty points");
    map.insert(ParkingPrecision::NAME, "Parked pose against the target parking space");
    map.insert(ManualTakeover::NAME, "Driver takeovers reported on the chassis topic");
    map
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Create an uninitialized evaluator by name.
///
/// Names are matched case-insensitively with `_` and `-` ignored, so
/// `max_speed`, `max-speed` and `MaxSpeed` are the same rule.
pub fn make_kpi(name: &str) -> Result<Box<dyn KpiEvaluator>, ConfigError> {
    let evaluator: Box<dyn KpiEvaluator> = match normalize(name).as_str() {
        "maxspeed" => Box::new(RuleEvaluator::<MaxSpeed>::new()),
        "acceleration" | "accelerationbounds" => Box::new(RuleEvaluator::<AccelerationBounds>::new()),
        "overspeedduration" => Box::new(RuleEvaluator::<OverSpeedDuration>::new()),
        "snakedriving" => Box::new(RuleEvaluator::<SnakeDriving>::new()),
        "followstartjerk" => Box::new(RuleEvaluator::<FollowStartJerk>::new()),
        "collision" => Box::new(RuleEvaluator::<Collision>::new()),
        "collisionpassive" => Box::new(RuleEvaluator::<CollisionPassive>::new()),
        "compliance" | "trafficcompliance" => Box::new(RuleEvaluator::<Compliance>::new()),
        "parkingprecision" => Box::new(RuleEvaluator::<ParkingPrecision>::new()),
        "manualtakeover" => Box::new(RuleEvaluator::<ManualTakeover>::new()),
        _ => return Err(ConfigError::UnknownKpi(name.to_string())),
    };
    Ok(evaluator)
}

// =============================================================================
// REGISTRY
// =============================================================================

/// One registered KPI: the definition it will be initialized with and its
/// evaluator.
pub struct RegistryEntry {
    pub definition: KpiDefinition,
    pub evaluator: Box<dyn KpiEvaluator>,
}

/// Ordered evaluator set, fixed once the run starts.
#[derive(Default)]
pub struct KpiRegistry {
    entries: Vec<RegistryEntry>,
    names: HashSet<String>,
}

impl KpiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a group, in file order. Unknown and duplicate names are
    /// returned alongside the registry instead of aborting it.
    pub fn from_group(group: &KpiGroup) -> (Self, Vec<ConfigError>) {
        let mut registry = Self::new();
        let mut rejected = Vec::new();
        for def in &group.kpis {
            let result = make_kpi(&def.name).and_then(|evaluator| registry.register(def.clone(), evaluator));
            if let Err(err) = result {
                warn!(kpi = %def.name, error = %err, "kpi not registered");
                rejected.push(err);
            }
        }
        info!(
            registered = registry.len(),
            rejected = rejected.len(),
            "kpi registry built"
        );
        (registry, rejected)
    }

    /// Append an evaluator. Names must be unique within the run.
    pub fn register(
        &mut self,
        definition: KpiDefinition,
        evaluator: Box<dyn KpiEvaluator>,
    ) -> Result<(), ConfigError> {
        if !self.names.insert(definition.name.clone()) {
            return Err(ConfigError::DuplicateKpi(definition.name));
        }
        self.entries.push(RegistryEntry {
            definition,
            evaluator,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.definition.name.as_str())
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [RegistryEntry] {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::config::ThresholdValue;
    use crate::grading::evaluator::Lifecycle;

    #[test]
    fn test_make_kpi_normalizes_names() {
        for name in ["MaxSpeed", "max_speed", "max-speed", "MAXSPEED"] {
            let kpi = make_kpi(name).unwrap();
            assert_eq!(kpi.name(), "MaxSpeed");
            assert_eq!(kpi.lifecycle(), Lifecycle::Uninitialized);
        }
    }

    #[test]
    fn test_make_kpi_unknown() {
        match make_kpi("LaneKeeping") {
            Err(ConfigError::UnknownKpi(name)) => assert_eq!(name, "LaneKeeping"),
            _ => panic!("expected unknown kpi"),
        }
    }

    #[test]
    fn test_make_traffic_rule_kpis() {
        assert_eq!(make_kpi("collision_passive").unwrap().name(), "CollisionPassive");
        assert_eq!(make_kpi("Compliance").unwrap().name(), "Compliance");
        assert_eq!(available_kpis().len(), 10);
    }

    #[test]
    fn test_every_available_kpi_is_constructible() {
        for name in available_kpis().keys() {
            assert!(make_kpi(name).is_ok(), "{} not constructible", name);
        }
    }

    #[test]
    fn test_from_group_skips_unknown_and_duplicates() {
        let group = KpiGroup {
            kpis: vec![
                KpiDefinition::new("MaxSpeed").with_threshold("Speed_H", ThresholdValue::Number(30.0)),
                KpiDefinition::new("NoSuchKpi"),
                KpiDefinition::new("Collision"),
                KpiDefinition::new("MaxSpeed"),
            ],
        };
        let (registry, rejected) = KpiRegistry::from_group(&group);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["MaxSpeed", "Collision"]);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[0], ConfigError::UnknownKpi(_)));
        assert!(matches!(rejected[1], ConfigError::DuplicateKpi(_)));
    }
}
