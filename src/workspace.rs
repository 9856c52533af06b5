use std::collections::HashMap;

use log::{debug, warn};
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::bucket::Bucket;
use crate::container::Container;
use crate::experiment::{Experiment, ExperimentStatus, ExperimentType, Variation};
use crate::remote_config::{RemoteConfigParameter, RemoteConfigTargetRule, RemoteConfigValue};
use crate::target::{Target, TargetAction, TargetRule, TargetingType};
use crate::value::{HackleValue, ValueType};

/// Workspace is an interface for the configuration snapshot an evaluation reads.
///
/// Ordinarily the only implementation is [DefaultWorkspace], built from a fetched
/// [WorkspaceConfig] and replaced wholesale on refresh. The engine never mutates it.
pub trait Workspace: Send + Sync {
    /// Retrieve the A/B test with key `experiment_key`.
    fn experiment(&self, experiment_key: i64) -> Option<&Experiment>;

    /// Retrieve the feature flag with key `feature_key`.
    fn feature_flag(&self, feature_key: i64) -> Option<&Experiment>;

    fn bucket(&self, bucket_id: i64) -> Option<&Bucket>;

    fn container(&self, container_id: i64) -> Option<&Container>;

    fn segment(&self, segment_key: &str) -> Option<&Segment>;

    fn parameter_configuration(&self, id: i64) -> Option<&ParameterConfiguration>;

    fn remote_config_parameter(&self, parameter_key: &str) -> Option<&RemoteConfigParameter>;
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    UserId,
    UserProperty,
    #[serde(other)]
    Unknown,
}

/// A named audience. A user belongs to it if any of its targets matches.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub id: i64,
    pub key: String,
    pub segment_type: SegmentType,
    pub targets: Vec<Target>,
}

/// A set of parameters attached to a variation.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterConfiguration {
    pub id: i64,
    pub parameters: HashMap<String, HackleValue>,
}

impl ParameterConfiguration {
    pub fn get(&self, key: &str) -> Option<&HackleValue> {
        self.parameters.get(key)
    }
}

/// The workspace configuration as delivered by the config-fetch collaborator.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    experiments: Vec<ExperimentConfig>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    feature_flags: Vec<ExperimentConfig>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    buckets: Vec<Bucket>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    segments: Vec<SegmentConfig>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    containers: Vec<Container>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    parameter_configurations: Vec<ParameterConfigurationConfig>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    remote_config_parameters: Vec<RemoteConfigParameterConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentConfig {
    id: i64,
    key: i64,
    #[serde(default)]
    name: Option<String>,
    identifier_type: String,
    version: i32,
    variations: Vec<VariationConfig>,
    execution: ExecutionConfig,
    #[serde(default)]
    winner_variation_id: Option<i64>,
    #[serde(default)]
    container_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariationConfig {
    id: i64,
    key: String,
    status: String,
    #[serde(default)]
    parameter_configuration_id: Option<i64>,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionConfig {
    status: String,
    version: i32,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    user_overrides: Vec<UserOverrideConfig>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    segment_overrides: Vec<TargetRule>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    target_audiences: Vec<Target>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    target_rules: Vec<TargetRule>,
    default_rule: TargetAction,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOverrideConfig {
    user_id: String,
    variation_id: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentConfig {
    id: i64,
    key: String,
    #[serde(rename = "type")]
    segment_type: SegmentType,
    #[serde(default)]
    targets: Vec<Target>,
}

#[derive(Clone, Debug, Deserialize)]
struct ParameterConfig {
    key: String,
    value: HackleValue,
}

#[derive(Clone, Debug, Deserialize)]
struct ParameterConfigurationConfig {
    id: i64,
    #[serde(default)]
    parameters: Vec<ParameterConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteConfigParameterConfig {
    id: i64,
    key: String,
    #[serde(rename = "type")]
    parameter_type: ValueType,
    identifier_type: String,
    #[serde(default)]
    target_rules: Vec<RemoteConfigTargetRuleConfig>,
    default_value: RemoteConfigValue,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteConfigTargetRuleConfig {
    key: String,
    name: String,
    target: Target,
    bucket_id: i64,
    value: RemoteConfigValue,
}

fn supported_rules(rules: Vec<TargetRule>, targeting_type: TargetingType) -> Vec<TargetRule> {
    rules
        .into_iter()
        .filter_map(|rule| {
            let target = rule.target.supported(targeting_type)?;
            Some(TargetRule {
                target,
                action: rule.action,
            })
        })
        .collect()
}

impl ExperimentConfig {
    fn into_experiment(self, experiment_type: ExperimentType) -> Option<Experiment> {
        let status = match ExperimentStatus::from_execution_status(&self.execution.status) {
            Some(status) => status,
            None => {
                debug!("Unsupported experiment status [{}]", self.execution.status);
                return None;
            }
        };

        let execution = self.execution;
        Some(Experiment {
            id: self.id,
            key: self.key,
            name: self.name,
            experiment_type,
            identifier_type: self.identifier_type,
            status,
            version: self.version,
            execution_version: execution.version,
            variations: self
                .variations
                .into_iter()
                .map(|v| Variation {
                    id: v.id,
                    key: v.key,
                    is_dropped: v.status == "DROPPED",
                    parameter_configuration_id: v.parameter_configuration_id,
                })
                .collect(),
            user_overrides: execution
                .user_overrides
                .into_iter()
                .map(|o| (o.user_id, o.variation_id))
                .collect(),
            segment_overrides: supported_rules(
                execution.segment_overrides,
                TargetingType::Identifier,
            ),
            target_audiences: execution
                .target_audiences
                .iter()
                .filter_map(|target| target.supported(TargetingType::Property))
                .collect(),
            target_rules: supported_rules(execution.target_rules, TargetingType::Property),
            default_rule: execution.default_rule,
            container_id: self.container_id,
            winner_variation_id: self.winner_variation_id,
        })
    }
}

/// Default [Workspace] built from a [WorkspaceConfig].
#[derive(Clone, Debug, Default)]
pub struct DefaultWorkspace {
    experiments: HashMap<i64, Experiment>,
    feature_flags: HashMap<i64, Experiment>,
    buckets: HashMap<i64, Bucket>,
    containers: HashMap<i64, Container>,
    segments: HashMap<String, Segment>,
    parameter_configurations: HashMap<i64, ParameterConfiguration>,
    remote_config_parameters: HashMap<String, RemoteConfigParameter>,
}

impl DefaultWorkspace {
    pub fn from_json(json: &str) -> serde_json::Result<DefaultWorkspace> {
        let config: WorkspaceConfig = serde_json::from_str(json)?;
        Ok(DefaultWorkspace::from(config))
    }
}

impl From<WorkspaceConfig> for DefaultWorkspace {
    fn from(config: WorkspaceConfig) -> Self {
        let experiments = config
            .experiments
            .into_iter()
            .filter_map(|e| e.into_experiment(ExperimentType::AbTest))
            .map(|e| (e.key, e))
            .collect();

        let feature_flags = config
            .feature_flags
            .into_iter()
            .filter_map(|e| e.into_experiment(ExperimentType::FeatureFlag))
            .map(|e| (e.key, e))
            .collect();

        let buckets = config
            .buckets
            .into_iter()
            .filter(|bucket| {
                if bucket.slot_size <= 0 {
                    warn!(
                        "bucket [{}] has an invalid slot size {}",
                        bucket.id, bucket.slot_size
                    );
                    return false;
                }
                true
            })
            .map(|bucket| (bucket.id, bucket))
            .collect();

        let containers = config
            .containers
            .into_iter()
            .map(|container| (container.id, container))
            .collect();

        let segments = config
            .segments
            .into_iter()
            .map(|s| {
                let segment = Segment {
                    id: s.id,
                    key: s.key,
                    segment_type: s.segment_type,
                    targets: s
                        .targets
                        .iter()
                        .filter_map(|target| target.supported(TargetingType::Segment))
                        .collect(),
                };
                (segment.key.clone(), segment)
            })
            .collect();

        let parameter_configurations = config
            .parameter_configurations
            .into_iter()
            .map(|c| {
                let configuration = ParameterConfiguration {
                    id: c.id,
                    parameters: c.parameters.into_iter().map(|p| (p.key, p.value)).collect(),
                };
                (configuration.id, configuration)
            })
            .collect();

        let remote_config_parameters = config
            .remote_config_parameters
            .into_iter()
            .map(|p| {
                let parameter = RemoteConfigParameter {
                    id: p.id,
                    key: p.key,
                    parameter_type: p.parameter_type,
                    identifier_type: p.identifier_type,
                    target_rules: p
                        .target_rules
                        .into_iter()
                        .filter_map(|rule| {
                            Some(RemoteConfigTargetRule {
                                target: rule.target.supported(TargetingType::Property)?,
                                key: rule.key,
                                name: rule.name,
                                bucket_id: rule.bucket_id,
                                value: rule.value,
                            })
                        })
                        .collect(),
                    default_value: p.default_value,
                };
                (parameter.key.clone(), parameter)
            })
            .collect();

        DefaultWorkspace {
            experiments,
            feature_flags,
            buckets,
            containers,
            segments,
            parameter_configurations,
            remote_config_parameters,
        }
    }
}

impl Workspace for DefaultWorkspace {
    fn experiment(&self, experiment_key: i64) -> Option<&Experiment> {
        self.experiments.get(&experiment_key)
    }

    fn feature_flag(&self, feature_key: i64) -> Option<&Experiment> {
        self.feature_flags.get(&feature_key)
    }

    fn bucket(&self, bucket_id: i64) -> Option<&Bucket> {
        self.buckets.get(&bucket_id)
    }

    fn container(&self, container_id: i64) -> Option<&Container> {
        self.containers.get(&container_id)
    }

    fn segment(&self, segment_key: &str) -> Option<&Segment> {
        self.segments.get(segment_key)
    }

    fn parameter_configuration(&self, id: i64) -> Option<&ParameterConfiguration> {
        self.parameter_configurations.get(&id)
    }

    fn remote_config_parameter(&self, parameter_key: &str) -> Option<&RemoteConfigParameter> {
        self.remote_config_parameters.get(parameter_key)
    }
}
