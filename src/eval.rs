use std::fmt;
use std::iter;
use std::sync::Arc;

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::action::ActionResolver;
use crate::bucket::{Bucketer, DefaultBucketer};
use crate::container::{ContainerResolver, MutualExclusionResolver};
use crate::error::{Error, Result};
use crate::experiment::{Experiment, ExperimentType, Variation};
use crate::flow::{ExperimentFlow, FlowResolvers};
use crate::matcher::TargetMatcher;
use crate::metrics::{EvaluationKind, EvaluationMetrics, MetricsSnapshot};
use crate::overrides::{ManualOverrideStorage, OverrideResolver};
use crate::remote_config::{RemoteConfigEvaluation, RemoteConfigEvaluator, RemoteConfigRequest};
use crate::user::HackleUser;
use crate::value::HackleValue;
use crate::workspace::{ParameterConfiguration, Workspace};

/// The variation key every experiment and feature flag falls back to. For feature flags it is
/// the "off" variation.
pub const DEFAULT_VARIATION_KEY: &str = "A";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvaluatorType {
    Experiment,
    RemoteConfig,
}

impl fmt::Display for EvaluatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluatorType::Experiment => write!(f, "EXPERIMENT"),
            EvaluatorType::RemoteConfig => write!(f, "REMOTE_CONFIG"),
        }
    }
}

/// Identifies a request in the evaluation stack. A/B tests and feature flags share the
/// [EvaluatorType::Experiment] type since their ids never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EvaluatorKey {
    pub evaluator_type: EvaluatorType,
    pub id: i64,
}

impl EvaluatorKey {
    pub fn experiment(id: i64) -> Self {
        EvaluatorKey {
            evaluator_type: EvaluatorType::Experiment,
            id,
        }
    }

    pub fn remote_config(id: i64) -> Self {
        EvaluatorKey {
            evaluator_type: EvaluatorType::RemoteConfig,
            id,
        }
    }
}

impl fmt::Display for EvaluatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.evaluator_type, self.id)
    }
}

/// What every request shares: the snapshot it reads and the user it is evaluated for.
pub trait EvaluatorRequest<'a> {
    fn key(&self) -> EvaluatorKey;

    fn workspace(&self) -> &'a dyn Workspace;

    fn user(&self) -> &'a HackleUser;
}

/// A request to evaluate an A/B test or a feature flag.
#[derive(Clone, Copy)]
pub struct ExperimentRequest<'a> {
    pub workspace: &'a dyn Workspace,
    pub user: &'a HackleUser,
    pub experiment: &'a Experiment,
    pub default_variation_key: &'a str,
}

impl<'a> ExperimentRequest<'a> {
    pub fn new(
        workspace: &'a dyn Workspace,
        user: &'a HackleUser,
        experiment: &'a Experiment,
        default_variation_key: &'a str,
    ) -> Self {
        ExperimentRequest {
            workspace,
            user,
            experiment,
            default_variation_key,
        }
    }

    /// A nested request for `experiment`, made while evaluating `parent`.
    pub fn of(parent: &dyn EvaluatorRequest<'a>, experiment: &'a Experiment) -> Self {
        ExperimentRequest::new(
            parent.workspace(),
            parent.user(),
            experiment,
            DEFAULT_VARIATION_KEY,
        )
    }
}

impl<'a> EvaluatorRequest<'a> for ExperimentRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::experiment(self.experiment.id)
    }

    fn workspace(&self) -> &'a dyn Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }
}

const PREALLOCATED_EVALUATION_STACK_SIZE: usize = 20;

/// State shared by every evaluation made on behalf of one top-level request.
///
/// The context must never be shared between top-level requests. It tracks the requests in flight
/// for cycle detection and collects the experiment evaluations computed while matching targets.
#[derive(Debug)]
pub struct EvaluationContext {
    stack: Vec<EvaluatorKey>,
    target_evaluations: Vec<ExperimentEvaluation>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(PREALLOCATED_EVALUATION_STACK_SIZE),
            target_evaluations: Vec::new(),
        }
    }

    pub fn stack(&self) -> &[EvaluatorKey] {
        &self.stack
    }

    pub fn contains(&self, key: &EvaluatorKey) -> bool {
        self.stack.contains(key)
    }

    pub fn add(&mut self, key: EvaluatorKey) {
        self.stack.push(key);
    }

    pub fn remove(&mut self, key: &EvaluatorKey) {
        if let Some(index) = self.stack.iter().rposition(|k| k == key) {
            self.stack.remove(index);
        }
    }

    pub fn target_evaluations(&self) -> &[ExperimentEvaluation] {
        &self.target_evaluations
    }

    /// Returns the evaluation already computed for `experiment_id` in this call tree.
    pub fn get(&self, experiment_id: i64) -> Option<&ExperimentEvaluation> {
        self.target_evaluations
            .iter()
            .find(|evaluation| evaluation.experiment_id == experiment_id)
    }

    pub fn add_target_evaluation(&mut self, evaluation: ExperimentEvaluation) {
        self.target_evaluations.push(evaluation);
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// DecisionReason describes why an evaluation produced its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// No workspace snapshot was available yet.
    SdkNotReady,
    /// Evaluation failed; the caller's default was returned.
    Exception,
    InvalidInput,
    ExperimentNotFound,
    ExperimentDraft,
    ExperimentPaused,
    ExperimentCompleted,
    Overridden,
    TrafficNotAllocated,
    TrafficAllocated,
    /// Traffic was allocated while evaluating another experiment's targeting condition.
    TrafficAllocatedByTargeting,
    NotInMutualExclusionExperiment,
    IdentifierNotFound,
    VariationDropped,
    NotInExperimentTarget,
    ExperimentControlGroup,
    FeatureFlagNotFound,
    FeatureFlagInactive,
    IndividualTargetMatch,
    TargetRuleMatch,
    DefaultRule,
    RemoteConfigParameterNotFound,
    /// The resolved remote config value's type differs from the requested default's type.
    TypeMismatch,
}

/// The outcome of evaluating one experiment or feature flag.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentEvaluation {
    pub reason: DecisionReason,
    /// Evaluations of other experiments computed while matching this one's targets.
    pub target_evaluations: Vec<ExperimentEvaluation>,
    pub experiment_id: i64,
    pub experiment_key: i64,
    pub experiment_type: ExperimentType,
    /// None when the default variation key does not name a variation of the experiment.
    pub variation_id: Option<i64>,
    pub variation_key: String,
    pub config: Option<ParameterConfiguration>,
}

impl ExperimentEvaluation {
    /// An evaluation that decided `variation`. Fails if the variation references a parameter
    /// configuration missing from the workspace.
    pub fn of(
        request: &ExperimentRequest,
        context: &EvaluationContext,
        variation: &Variation,
        reason: DecisionReason,
    ) -> Result<Self> {
        let config = match variation.parameter_configuration_id {
            Some(id) => Some(
                request
                    .workspace
                    .parameter_configuration(id)
                    .cloned()
                    .ok_or(Error::ParameterConfigurationNotFound(id))?,
            ),
            None => None,
        };

        Ok(ExperimentEvaluation {
            reason,
            target_evaluations: context.target_evaluations().to_vec(),
            experiment_id: request.experiment.id,
            experiment_key: request.experiment.key,
            experiment_type: request.experiment.experiment_type,
            variation_id: Some(variation.id),
            variation_key: variation.key.clone(),
            config,
        })
    }

    /// An evaluation that fell back to the request's default variation key.
    pub fn of_default(
        request: &ExperimentRequest,
        context: &EvaluationContext,
        reason: DecisionReason,
    ) -> Result<Self> {
        if let Some(variation) = request
            .experiment
            .variation_by_key(request.default_variation_key)
        {
            return Self::of(request, context, variation, reason);
        }

        Ok(ExperimentEvaluation {
            reason,
            target_evaluations: context.target_evaluations().to_vec(),
            experiment_id: request.experiment.id,
            experiment_key: request.experiment.key,
            experiment_type: request.experiment.experiment_type,
            variation_id: None,
            variation_key: request.default_variation_key.to_string(),
            config: None,
        })
    }

    pub fn with_reason(self, reason: DecisionReason) -> Self {
        ExperimentEvaluation { reason, ..self }
    }
}

/// The result handed back to the SDK caller by the public entry points.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision<T> {
    pub value: T,
    pub variation_id: Option<i64>,
    pub reason: DecisionReason,
    pub config: Option<ParameterConfiguration>,
}

impl<T> Decision<T> {
    /// A decision carrying only a value, e.g. the caller's default.
    pub fn of(value: T, reason: DecisionReason) -> Self {
        Decision {
            value,
            variation_id: None,
            reason,
            config: None,
        }
    }

    /// Returns the parameter `key` of the decided variation's configuration.
    pub fn parameter(&self, key: &str) -> Option<&HackleValue> {
        self.config.as_ref().and_then(|config| config.get(key))
    }
}

/// Evaluates experiments on behalf of targeting conditions that reference them.
pub trait ExperimentEvaluator {
    /// Evaluate `request` within `context`, failing on a request cycle.
    fn evaluate_experiment(
        &self,
        request: &ExperimentRequest,
        context: &mut EvaluationContext,
    ) -> Result<ExperimentEvaluation>;
}

/// The evaluation engine.
///
/// An evaluator is immutable once built and may be shared across threads; every public entry
/// point creates its own [EvaluationContext].
pub struct Evaluator {
    experiment_flow: ExperimentFlow,
    feature_flag_flow: ExperimentFlow,
    remote_config_evaluator: RemoteConfigEvaluator,
    metrics: EvaluationMetrics,
}

impl Evaluator {
    /// Builds an evaluator bucketing with MurmurHash3.
    pub fn new(manual_override_storage: Arc<dyn ManualOverrideStorage>) -> Self {
        Self::with_bucketer(manual_override_storage, Arc::new(DefaultBucketer::new()))
    }

    pub fn with_bucketer(
        manual_override_storage: Arc<dyn ManualOverrideStorage>,
        bucketer: Arc<dyn Bucketer>,
    ) -> Self {
        let target_matcher = TargetMatcher::new();
        let action_resolver = ActionResolver::new(bucketer.clone());
        let resolvers = FlowResolvers {
            override_resolver: OverrideResolver::new(
                manual_override_storage,
                target_matcher.clone(),
                action_resolver.clone(),
            ),
            mutual_exclusion_resolver: MutualExclusionResolver::new(ContainerResolver::new(
                bucketer.clone(),
            )),
            target_matcher: target_matcher.clone(),
            action_resolver,
        };

        Evaluator {
            experiment_flow: ExperimentFlow::experiment(resolvers.clone()),
            feature_flag_flow: ExperimentFlow::feature_flag(resolvers),
            remote_config_evaluator: RemoteConfigEvaluator::new(target_matcher, bucketer),
            metrics: EvaluationMetrics::new(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Decide the variation of A/B test `experiment_key` for `user`.
    ///
    /// Never fails: a missing workspace, a missing experiment or an evaluation error all decide
    /// `default_variation_key` with an explanatory reason.
    pub fn experiment(
        &self,
        workspace: Option<&dyn Workspace>,
        experiment_key: i64,
        user: &HackleUser,
        default_variation_key: &str,
    ) -> Decision<String> {
        let timer = self.metrics.start(EvaluationKind::Experiment);
        let decision = self.decide_experiment(workspace, experiment_key, user, default_variation_key);
        timer.stop(decision.reason);
        decision
    }

    fn decide_experiment(
        &self,
        workspace: Option<&dyn Workspace>,
        experiment_key: i64,
        user: &HackleUser,
        default_variation_key: &str,
    ) -> Decision<String> {
        let default = || default_variation_key.to_string();
        let workspace = match workspace {
            Some(workspace) => workspace,
            None => return Decision::of(default(), DecisionReason::SdkNotReady),
        };
        let experiment = match workspace.experiment(experiment_key) {
            Some(experiment) => experiment,
            None => return Decision::of(default(), DecisionReason::ExperimentNotFound),
        };

        let request = ExperimentRequest::new(workspace, user, experiment, default_variation_key);
        match self.evaluate_experiment(&request, &mut EvaluationContext::new()) {
            Ok(evaluation) => Decision {
                value: evaluation.variation_key,
                variation_id: evaluation.variation_id,
                reason: evaluation.reason,
                config: evaluation.config,
            },
            Err(e) => {
                warn!(
                    "Unexpected error while deciding experiment [{}]: {}",
                    experiment_key, e
                );
                Decision::of(default(), DecisionReason::Exception)
            }
        }
    }

    /// Decide whether feature flag `feature_key` is on for `user`. Off is the default.
    pub fn feature_flag(
        &self,
        workspace: Option<&dyn Workspace>,
        feature_key: i64,
        user: &HackleUser,
    ) -> Decision<bool> {
        let timer = self.metrics.start(EvaluationKind::FeatureFlag);
        let decision = self.decide_feature_flag(workspace, feature_key, user);
        timer.stop(decision.reason);
        decision
    }

    fn decide_feature_flag(
        &self,
        workspace: Option<&dyn Workspace>,
        feature_key: i64,
        user: &HackleUser,
    ) -> Decision<bool> {
        let workspace = match workspace {
            Some(workspace) => workspace,
            None => return Decision::of(false, DecisionReason::SdkNotReady),
        };
        let feature_flag = match workspace.feature_flag(feature_key) {
            Some(feature_flag) => feature_flag,
            None => return Decision::of(false, DecisionReason::FeatureFlagNotFound),
        };

        let request = ExperimentRequest::new(workspace, user, feature_flag, DEFAULT_VARIATION_KEY);
        match self.evaluate_experiment(&request, &mut EvaluationContext::new()) {
            Ok(evaluation) => Decision {
                value: evaluation.variation_key != DEFAULT_VARIATION_KEY,
                variation_id: evaluation.variation_id,
                reason: evaluation.reason,
                config: evaluation.config,
            },
            Err(e) => {
                warn!(
                    "Unexpected error while deciding feature flag [{}]: {}",
                    feature_key, e
                );
                Decision::of(false, DecisionReason::Exception)
            }
        }
    }

    /// Resolve remote config parameter `parameter_key` for `user`, falling back to `default`.
    pub fn remote_config(
        &self,
        workspace: Option<&dyn Workspace>,
        parameter_key: &str,
        user: &HackleUser,
        default: HackleValue,
    ) -> Decision<HackleValue> {
        let timer = self.metrics.start(EvaluationKind::RemoteConfig);
        let decision = self.decide_remote_config(workspace, parameter_key, user, default);
        timer.stop(decision.reason);
        decision
    }

    fn decide_remote_config(
        &self,
        workspace: Option<&dyn Workspace>,
        parameter_key: &str,
        user: &HackleUser,
        default: HackleValue,
    ) -> Decision<HackleValue> {
        let workspace = match workspace {
            Some(workspace) => workspace,
            None => return Decision::of(default, DecisionReason::SdkNotReady),
        };
        let parameter = match workspace.remote_config_parameter(parameter_key) {
            Some(parameter) => parameter,
            None => {
                return Decision::of(default, DecisionReason::RemoteConfigParameterNotFound)
            }
        };

        let request = RemoteConfigRequest::new(workspace, user, parameter, default.clone());
        match self.evaluate_remote_config(&request, &mut EvaluationContext::new()) {
            Ok(evaluation) => Decision::of(evaluation.value, evaluation.reason),
            Err(e) => {
                warn!(
                    "Unexpected error while deciding remote config parameter [{}]: {}",
                    parameter_key, e
                );
                Decision::of(default, DecisionReason::Exception)
            }
        }
    }

    /// Evaluate a remote config request within `context`, failing on a request cycle.
    pub fn evaluate_remote_config(
        &self,
        request: &RemoteConfigRequest,
        context: &mut EvaluationContext,
    ) -> Result<RemoteConfigEvaluation> {
        self.in_stack(request.key(), context, |context| {
            self.remote_config_evaluator.evaluate(request, context, self)
        })
    }

    /// Runs `f` with `key` pushed on the context's stack, failing if `key` is already in flight.
    fn in_stack<T, F>(&self, key: EvaluatorKey, context: &mut EvaluationContext, f: F) -> Result<T>
    where
        F: FnOnce(&mut EvaluationContext) -> Result<T>,
    {
        if context.contains(&key) {
            let stack = context.stack().iter().chain(iter::once(&key)).join(" - ");
            return Err(Error::CircularEvaluation { stack });
        }

        context.add(key);
        let result = f(context);
        context.remove(&key);
        result
    }
}

impl ExperimentEvaluator for Evaluator {
    fn evaluate_experiment(
        &self,
        request: &ExperimentRequest,
        context: &mut EvaluationContext,
    ) -> Result<ExperimentEvaluation> {
        self.in_stack(request.key(), context, |context| {
            match request.experiment.experiment_type {
                ExperimentType::AbTest => match self.experiment_flow.evaluate(request, context, self)? {
                    Some(evaluation) => Ok(evaluation),
                    None => ExperimentEvaluation::of_default(
                        request,
                        context,
                        DecisionReason::TrafficNotAllocated,
                    ),
                },
                ExperimentType::FeatureFlag => self
                    .feature_flag_flow
                    .evaluate(request, context, self)?
                    .ok_or_else(|| {
                        Error::InvalidState("FeatureFlag must decide the Variation".to_string())
                    }),
            }
        })
    }
}
