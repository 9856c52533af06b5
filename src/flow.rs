use crate::action::ActionResolver;
use crate::container::MutualExclusionResolver;
use crate::error::{Error, Result};
use crate::eval::{
    DecisionReason, EvaluationContext, ExperimentEvaluation, ExperimentEvaluator,
    ExperimentRequest,
};
use crate::experiment::{ExperimentStatus, ExperimentType};
use crate::matcher::TargetMatcher;
use crate::overrides::OverrideResolver;

/// The resolvers every flow step may consult.
#[derive(Clone)]
pub struct FlowResolvers {
    pub target_matcher: TargetMatcher,
    pub action_resolver: ActionResolver,
    pub override_resolver: OverrideResolver,
    pub mutual_exclusion_resolver: MutualExclusionResolver,
}

/// One step of an [ExperimentFlow]. A step either decides the evaluation or passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStep {
    /// The user lacks the experiment's identifier type.
    Identifier,
    /// Manual, user or segment override.
    Override,
    Draft,
    Paused,
    /// Completed experiments decide their winner.
    Completed,
    /// Target audiences of an A/B test.
    ExperimentTarget,
    MutualExclusion,
    /// The default rule of an A/B test, bucketing the user into a variation.
    TrafficAllocate,
    /// Target rules of a feature flag.
    TargetRule,
    /// The default rule of a feature flag.
    DefaultRule,
}

const EXPERIMENT_STEPS: [FlowStep; 8] = [
    FlowStep::Identifier,
    FlowStep::Override,
    FlowStep::Draft,
    FlowStep::Paused,
    FlowStep::Completed,
    FlowStep::ExperimentTarget,
    FlowStep::MutualExclusion,
    FlowStep::TrafficAllocate,
];

const FEATURE_FLAG_STEPS: [FlowStep; 7] = [
    FlowStep::Draft,
    FlowStep::Paused,
    FlowStep::Completed,
    FlowStep::Override,
    FlowStep::Identifier,
    FlowStep::TargetRule,
    FlowStep::DefaultRule,
];

/// A fixed, ordered chain of [FlowStep]s.
#[derive(Clone)]
pub struct ExperimentFlow {
    steps: Vec<FlowStep>,
    resolvers: FlowResolvers,
}

impl ExperimentFlow {
    /// The A/B test flow.
    pub fn experiment(resolvers: FlowResolvers) -> Self {
        Self {
            steps: EXPERIMENT_STEPS.to_vec(),
            resolvers,
        }
    }

    /// The feature flag flow.
    pub fn feature_flag(resolvers: FlowResolvers) -> Self {
        Self {
            steps: FEATURE_FLAG_STEPS.to_vec(),
            resolvers,
        }
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    /// Runs the steps in order until one decides. Returns None if every step passed.
    pub fn evaluate(
        &self,
        request: &ExperimentRequest,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<Option<ExperimentEvaluation>> {
        for step in &self.steps {
            if let Some(evaluation) = self.evaluate_step(*step, request, context, evaluator)? {
                return Ok(Some(evaluation));
            }
        }
        Ok(None)
    }

    fn evaluate_step(
        &self,
        step: FlowStep,
        request: &ExperimentRequest,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<Option<ExperimentEvaluation>> {
        let experiment = request.experiment;
        match step {
            FlowStep::Identifier => {
                if request.user.identifier(&experiment.identifier_type).is_some() {
                    return Ok(None);
                }
                ExperimentEvaluation::of_default(request, context, DecisionReason::IdentifierNotFound)
                    .map(Some)
            }
            FlowStep::Override => {
                let variation =
                    self.resolvers
                        .override_resolver
                        .resolve(request, context, evaluator)?;
                match variation {
                    Some(variation) => {
                        let reason = match experiment.experiment_type {
                            ExperimentType::AbTest => DecisionReason::Overridden,
                            ExperimentType::FeatureFlag => DecisionReason::IndividualTargetMatch,
                        };
                        ExperimentEvaluation::of(request, context, variation, reason).map(Some)
                    }
                    None => Ok(None),
                }
            }
            FlowStep::Draft => {
                if experiment.status != ExperimentStatus::Draft {
                    return Ok(None);
                }
                ExperimentEvaluation::of_default(request, context, DecisionReason::ExperimentDraft)
                    .map(Some)
            }
            FlowStep::Paused => {
                if experiment.status != ExperimentStatus::Paused {
                    return Ok(None);
                }
                let reason = match experiment.experiment_type {
                    ExperimentType::AbTest => DecisionReason::ExperimentPaused,
                    ExperimentType::FeatureFlag => DecisionReason::FeatureFlagInactive,
                };
                ExperimentEvaluation::of_default(request, context, reason).map(Some)
            }
            FlowStep::Completed => {
                if experiment.status != ExperimentStatus::Completed {
                    return Ok(None);
                }
                let winner = experiment
                    .winner_variation()
                    .ok_or(Error::WinnerVariationNotFound(experiment.id))?;
                ExperimentEvaluation::of(request, context, winner, DecisionReason::ExperimentCompleted)
                    .map(Some)
            }
            FlowStep::ExperimentTarget => {
                if experiment.target_audiences.is_empty()
                    || self.resolvers.target_matcher.any_matches(
                        request,
                        context,
                        &experiment.target_audiences,
                        evaluator,
                    )?
                {
                    return Ok(None);
                }
                ExperimentEvaluation::of_default(
                    request,
                    context,
                    DecisionReason::NotInExperimentTarget,
                )
                .map(Some)
            }
            FlowStep::MutualExclusion => {
                if self
                    .resolvers
                    .mutual_exclusion_resolver
                    .is_mutual_exclusion_group(request)?
                {
                    return Ok(None);
                }
                ExperimentEvaluation::of_default(
                    request,
                    context,
                    DecisionReason::NotInMutualExclusionExperiment,
                )
                .map(Some)
            }
            FlowStep::TrafficAllocate => self.allocate_traffic(request, context).map(Some),
            FlowStep::TargetRule => self.match_target_rule(request, context, evaluator),
            FlowStep::DefaultRule => self.resolve_default_rule(request, context).map(Some),
        }
    }

    fn allocate_traffic(
        &self,
        request: &ExperimentRequest,
        context: &EvaluationContext,
    ) -> Result<ExperimentEvaluation> {
        let experiment = request.experiment;
        if experiment.status != ExperimentStatus::Running {
            return Err(Error::InvalidState(format!(
                "experiment status must be RUNNING [{}]",
                experiment.id
            )));
        }

        let variation = match self
            .resolvers
            .action_resolver
            .resolve(request, &experiment.default_rule)?
        {
            Some(variation) => variation,
            None => {
                return ExperimentEvaluation::of_default(
                    request,
                    context,
                    DecisionReason::TrafficNotAllocated,
                )
            }
        };

        if variation.is_dropped {
            return ExperimentEvaluation::of_default(
                request,
                context,
                DecisionReason::VariationDropped,
            );
        }
        ExperimentEvaluation::of(request, context, variation, DecisionReason::TrafficAllocated)
    }

    fn match_target_rule(
        &self,
        request: &ExperimentRequest,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<Option<ExperimentEvaluation>> {
        let experiment = request.experiment;
        if request.user.identifier(&experiment.identifier_type).is_none() {
            return Ok(None);
        }

        for rule in &experiment.target_rules {
            if !self
                .resolvers
                .target_matcher
                .matches(request, context, &rule.target, evaluator)?
            {
                continue;
            }
            let variation = self
                .resolvers
                .action_resolver
                .resolve(request, &rule.action)?
                .ok_or_else(feature_flag_undecided)?;
            return ExperimentEvaluation::of(
                request,
                context,
                variation,
                DecisionReason::TargetRuleMatch,
            )
            .map(Some);
        }
        Ok(None)
    }

    fn resolve_default_rule(
        &self,
        request: &ExperimentRequest,
        context: &EvaluationContext,
    ) -> Result<ExperimentEvaluation> {
        let experiment = request.experiment;
        if request.user.identifier(&experiment.identifier_type).is_none() {
            return ExperimentEvaluation::of_default(request, context, DecisionReason::DefaultRule);
        }

        let variation = self
            .resolvers
            .action_resolver
            .resolve(request, &experiment.default_rule)?
            .ok_or_else(feature_flag_undecided)?;
        ExperimentEvaluation::of(request, context, variation, DecisionReason::DefaultRule)
    }
}

fn feature_flag_undecided() -> Error {
    Error::InvalidState("FeatureFlag must decide the Variation".to_string())
}
