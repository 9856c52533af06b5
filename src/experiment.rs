use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::target::{Target, TargetAction, TargetRule};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentType {
    AbTest,
    FeatureFlag,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

impl ExperimentStatus {
    /// Maps the execution status of the workspace config. Unknown statuses yield None.
    pub fn from_execution_status(status: &str) -> Option<ExperimentStatus> {
        match status {
            "READY" => Some(ExperimentStatus::Draft),
            "RUNNING" => Some(ExperimentStatus::Running),
            "PAUSED" => Some(ExperimentStatus::Paused),
            "STOPPED" => Some(ExperimentStatus::Completed),
            _ => None,
        }
    }
}

/// One arm of an experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct Variation {
    pub id: i64,
    pub key: String,
    /// A dropped variation still owns its slots, but users allocated to it receive the default.
    pub is_dropped: bool,
    pub parameter_configuration_id: Option<i64>,
}

/// An A/B test or a feature flag, as evaluated by the engine.
///
/// Feature flags share the experiment model: "off" is the variation keyed `"A"`.
#[derive(Clone, Debug, PartialEq)]
pub struct Experiment {
    pub id: i64,
    pub key: i64,
    pub name: Option<String>,
    pub experiment_type: ExperimentType,
    pub identifier_type: String,
    pub status: ExperimentStatus,
    pub version: i32,
    pub execution_version: i32,
    pub variations: Vec<Variation>,
    /// Variation id by identifier.
    pub user_overrides: HashMap<String, i64>,
    pub segment_overrides: Vec<TargetRule>,
    pub target_audiences: Vec<Target>,
    pub target_rules: Vec<TargetRule>,
    pub default_rule: TargetAction,
    pub container_id: Option<i64>,
    pub winner_variation_id: Option<i64>,
}

impl Experiment {
    pub fn variation_by_id(&self, variation_id: i64) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == variation_id)
    }

    pub fn variation_by_key(&self, variation_key: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.key == variation_key)
    }

    pub fn winner_variation(&self) -> Option<&Variation> {
        self.winner_variation_id
            .and_then(|variation_id| self.variation_by_id(variation_id))
    }
}
