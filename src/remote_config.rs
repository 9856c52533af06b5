use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::bucket::Bucketer;
use crate::error::{Error, Result};
use crate::eval::{
    DecisionReason, EvaluationContext, EvaluatorKey, EvaluatorRequest, ExperimentEvaluation,
    ExperimentEvaluator,
};
use crate::matcher::TargetMatcher;
use crate::target::Target;
use crate::user::HackleUser;
use crate::value::{HackleValue, ValueType};
use crate::workspace::Workspace;

/// A remote config parameter: a typed value chosen per user by target rules.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigParameter {
    pub id: i64,
    pub key: String,
    pub parameter_type: ValueType,
    pub identifier_type: String,
    pub target_rules: Vec<RemoteConfigTargetRule>,
    pub default_value: RemoteConfigValue,
}

/// A rule applies when its target matches and the user falls into an allocated slot of its bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigTargetRule {
    pub target: Target,
    pub key: String,
    pub name: String,
    pub bucket_id: i64,
    pub value: RemoteConfigValue,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RemoteConfigValue {
    pub id: i64,
    pub value: HackleValue,
}

/// A request to resolve one remote config parameter.
#[derive(Clone)]
pub struct RemoteConfigRequest<'a> {
    pub workspace: &'a dyn Workspace,
    pub user: &'a HackleUser,
    pub parameter: &'a RemoteConfigParameter,
    /// Returned on any non-match; its type is the type the caller expects.
    pub default_value: HackleValue,
}

impl<'a> RemoteConfigRequest<'a> {
    pub fn new(
        workspace: &'a dyn Workspace,
        user: &'a HackleUser,
        parameter: &'a RemoteConfigParameter,
        default_value: HackleValue,
    ) -> Self {
        RemoteConfigRequest {
            workspace,
            user,
            parameter,
            default_value,
        }
    }
}

impl<'a> EvaluatorRequest<'a> for RemoteConfigRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::remote_config(self.parameter.id)
    }

    fn workspace(&self) -> &'a dyn Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigEvaluation {
    pub reason: DecisionReason,
    pub target_evaluations: Vec<ExperimentEvaluation>,
    pub parameter_id: i64,
    pub parameter_key: String,
    /// None when the caller's default was returned.
    pub value_id: Option<i64>,
    pub value: HackleValue,
    /// Details of the decision: requested type and default, matched rule, returned value.
    pub properties: Map<String, Value>,
}

impl RemoteConfigEvaluation {
    fn of(
        request: &RemoteConfigRequest,
        context: &EvaluationContext,
        value_id: Option<i64>,
        value: HackleValue,
        reason: DecisionReason,
        mut properties: Map<String, Value>,
    ) -> Self {
        properties.insert("returnValue".to_string(), to_json(&value));
        RemoteConfigEvaluation {
            reason,
            target_evaluations: context.target_evaluations().to_vec(),
            parameter_id: request.parameter.id,
            parameter_key: request.parameter.key.clone(),
            value_id,
            value,
            properties,
        }
    }

    fn of_default(
        request: &RemoteConfigRequest,
        context: &EvaluationContext,
        reason: DecisionReason,
        properties: Map<String, Value>,
    ) -> Self {
        Self::of(
            request,
            context,
            None,
            request.default_value.clone(),
            reason,
            properties,
        )
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Resolves remote config parameters: first matching target rule, else the parameter default.
#[derive(Clone)]
pub struct RemoteConfigEvaluator {
    target_matcher: TargetMatcher,
    bucketer: Arc<dyn Bucketer>,
}

impl RemoteConfigEvaluator {
    pub fn new(target_matcher: TargetMatcher, bucketer: Arc<dyn Bucketer>) -> Self {
        Self {
            target_matcher,
            bucketer,
        }
    }

    pub fn evaluate(
        &self,
        request: &RemoteConfigRequest,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<RemoteConfigEvaluation> {
        let mut properties = Map::new();
        properties.insert(
            "requestValueType".to_string(),
            to_json(&request.default_value.value_type()),
        );
        properties.insert(
            "requestDefaultValue".to_string(),
            to_json(&request.default_value),
        );

        if request
            .user
            .identifier(&request.parameter.identifier_type)
            .is_none()
        {
            return Ok(RemoteConfigEvaluation::of_default(
                request,
                context,
                DecisionReason::IdentifierNotFound,
                properties,
            ));
        }

        if let Some(rule) = self.determine_target_rule(request, context, evaluator)? {
            properties.insert("targetRuleKey".to_string(), Value::String(rule.key.clone()));
            properties.insert("targetRuleName".to_string(), Value::String(rule.name.clone()));
            return Ok(evaluation(
                request,
                context,
                &rule.value,
                DecisionReason::TargetRuleMatch,
                properties,
            ));
        }

        Ok(evaluation(
            request,
            context,
            &request.parameter.default_value,
            DecisionReason::DefaultRule,
            properties,
        ))
    }

    fn determine_target_rule<'a>(
        &self,
        request: &RemoteConfigRequest<'a>,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<Option<&'a RemoteConfigTargetRule>> {
        let parameter = request.parameter;
        for rule in &parameter.target_rules {
            if self.rule_matches(request, context, rule, evaluator)? {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    fn rule_matches(
        &self,
        request: &RemoteConfigRequest,
        context: &mut EvaluationContext,
        rule: &RemoteConfigTargetRule,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<bool> {
        if !self
            .target_matcher
            .matches(request, context, &rule.target, evaluator)?
        {
            return Ok(false);
        }

        let identifier = match request.user.identifier(&request.parameter.identifier_type) {
            Some(identifier) => identifier,
            None => return Ok(false),
        };

        let bucket = request
            .workspace
            .bucket(rule.bucket_id)
            .ok_or(Error::BucketNotFound(rule.bucket_id))?;
        Ok(self.bucketer.bucketing(bucket, identifier).is_some())
    }
}

fn evaluation(
    request: &RemoteConfigRequest,
    context: &EvaluationContext,
    parameter_value: &RemoteConfigValue,
    reason: DecisionReason,
    properties: Map<String, Value>,
) -> RemoteConfigEvaluation {
    if parameter_value.value.value_type() != request.default_value.value_type() {
        return RemoteConfigEvaluation::of_default(
            request,
            context,
            DecisionReason::TypeMismatch,
            properties,
        );
    }
    RemoteConfigEvaluation::of(
        request,
        context,
        Some(parameter_value.id),
        parameter_value.value.clone(),
        reason,
        properties,
    )
}
