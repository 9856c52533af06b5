use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::value::{HackleValue, ValueType};

/// A conjunction of conditions. An empty target matches every user.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Target {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Condition {
    pub key: TargetKey,
    #[serde(rename = "match")]
    pub target_match: TargetMatch,
}

/// What a condition reads: an identifier, a property, a segment or another experiment's outcome.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TargetKey {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    UserId,
    UserProperty,
    HackleProperty,
    Segment,
    AbTest,
    FeatureFlag,
    #[serde(other)]
    Unknown,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::UserId => "USER_ID",
            KeyType::UserProperty => "USER_PROPERTY",
            KeyType::HackleProperty => "HACKLE_PROPERTY",
            KeyType::Segment => "SEGMENT",
            KeyType::AbTest => "AB_TEST",
            KeyType::FeatureFlag => "FEATURE_FLAG",
            KeyType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetMatch {
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub operator: Operator,
    pub value_type: ValueType,
    #[serde(default)]
    pub values: Vec<HackleValue>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Match,
    NotMatch,
}

impl MatchType {
    pub fn matches(&self, is_matched: bool) -> bool {
        match self {
            MatchType::Match => is_matched,
            MatchType::NotMatch => !is_matched,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    In,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    Regex,
    #[serde(other)]
    Unknown,
}

/// Which condition keys a target may use, depending on where the target appears.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetingType {
    /// Segment overrides: segment membership only.
    Identifier,
    /// Audiences and rules of experiments, feature flags and remote config parameters.
    Property,
    /// Targets inside a segment definition.
    Segment,
}

impl TargetingType {
    pub fn supports(&self, key_type: KeyType) -> bool {
        match self {
            TargetingType::Identifier => matches!(key_type, KeyType::Segment),
            TargetingType::Property => matches!(
                key_type,
                KeyType::UserProperty
                    | KeyType::HackleProperty
                    | KeyType::Segment
                    | KeyType::AbTest
                    | KeyType::FeatureFlag
            ),
            TargetingType::Segment => matches!(
                key_type,
                KeyType::UserId | KeyType::UserProperty | KeyType::HackleProperty
            ),
        }
    }
}

impl Condition {
    fn is_supported(&self, targeting_type: TargetingType) -> bool {
        targeting_type.supports(self.key.key_type)
            && self.target_match.operator != Operator::Unknown
            && self.target_match.value_type != ValueType::Unknown
    }
}

impl Target {
    /// Drops the conditions `targeting_type` does not support. A target left without conditions
    /// is dropped entirely.
    pub(crate) fn supported(&self, targeting_type: TargetingType) -> Option<Target> {
        let conditions: Vec<Condition> = self
            .conditions
            .iter()
            .filter(|condition| condition.is_supported(targeting_type))
            .cloned()
            .collect();
        if conditions.is_empty() {
            None
        } else {
            Some(Target { conditions })
        }
    }
}

/// Where a rule sends a matched user: a fixed variation, or a bucket that splits traffic.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub variation_id: Option<i64>,
    #[serde(default)]
    pub bucket_id: Option<i64>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Variation,
    Bucket,
}

impl TargetAction {
    pub fn variation(variation_id: i64) -> Self {
        TargetAction {
            action_type: ActionType::Variation,
            variation_id: Some(variation_id),
            bucket_id: None,
        }
    }

    pub fn bucket(bucket_id: i64) -> Self {
        TargetAction {
            action_type: ActionType::Bucket,
            variation_id: None,
            bucket_id: Some(bucket_id),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TargetRule {
    pub target: Target,
    pub action: TargetAction,
}
