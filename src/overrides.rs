use std::sync::Arc;

use crate::action::ActionResolver;
use crate::error::Result;
use crate::eval::{EvaluationContext, ExperimentEvaluator, ExperimentRequest};
use crate::experiment::{Experiment, Variation};
use crate::matcher::TargetMatcher;
use crate::user::HackleUser;

/// Trait for the collaborator that stores variations forced by an operator on the device, e.g.
/// from a debug screen.
pub trait ManualOverrideStorage: Send + Sync {
    /// Returns the overridden variation id of `experiment` for `user`, if any.
    fn get(&self, experiment: &Experiment, user: &HackleUser) -> Option<i64>;
}

/// Resolves a forced variation: manual override, then user override, then segment override.
#[derive(Clone)]
pub struct OverrideResolver {
    manual_override_storage: Arc<dyn ManualOverrideStorage>,
    target_matcher: TargetMatcher,
    action_resolver: ActionResolver,
}

impl OverrideResolver {
    pub fn new(
        manual_override_storage: Arc<dyn ManualOverrideStorage>,
        target_matcher: TargetMatcher,
        action_resolver: ActionResolver,
    ) -> Self {
        Self {
            manual_override_storage,
            target_matcher,
            action_resolver,
        }
    }

    pub fn resolve<'a>(
        &self,
        request: &ExperimentRequest<'a>,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<Option<&'a Variation>> {
        if let Some(variation) = self.resolve_manual_override(request) {
            return Ok(Some(variation));
        }
        if let Some(variation) = self.resolve_user_override(request) {
            return Ok(Some(variation));
        }
        self.resolve_segment_override(request, context, evaluator)
    }

    fn resolve_manual_override<'a>(&self, request: &ExperimentRequest<'a>) -> Option<&'a Variation> {
        let variation_id = self
            .manual_override_storage
            .get(request.experiment, request.user)?;
        request.experiment.variation_by_id(variation_id)
    }

    fn resolve_user_override<'a>(&self, request: &ExperimentRequest<'a>) -> Option<&'a Variation> {
        let experiment = request.experiment;
        let identifier = request.user.identifier(&experiment.identifier_type)?;
        let variation_id = experiment.user_overrides.get(identifier)?;
        experiment.variation_by_id(*variation_id)
    }

    fn resolve_segment_override<'a>(
        &self,
        request: &ExperimentRequest<'a>,
        context: &mut EvaluationContext,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<Option<&'a Variation>> {
        for rule in &request.experiment.segment_overrides {
            if self
                .target_matcher
                .matches(request, context, &rule.target, evaluator)?
            {
                return self.action_resolver.resolve(request, &rule.action);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::DefaultBucketer;
    use crate::eval::Evaluator;
    use crate::test_common::{workspace, InMemoryManualOverrideStorage};
    use crate::workspace::Workspace;
    use spectral::prelude::*;

    fn resolver(storage: Arc<InMemoryManualOverrideStorage>) -> OverrideResolver {
        OverrideResolver::new(
            storage,
            TargetMatcher::new(),
            ActionResolver::new(Arc::new(DefaultBucketer::new())),
        )
    }

    fn resolve_key(
        storage: Arc<InMemoryManualOverrideStorage>,
        experiment_key: i64,
        user: &HackleUser,
    ) -> Result<Option<String>> {
        let workspace = workspace();
        let experiment = workspace.experiment(experiment_key).unwrap();
        let request = ExperimentRequest::new(&workspace, user, experiment, "A");
        let evaluator = Evaluator::new(storage.clone());

        let variation = resolver(storage).resolve(
            &request,
            &mut EvaluationContext::new(),
            &evaluator,
        )?;
        Ok(variation.map(|v| v.key.clone()))
    }

    #[test]
    fn no_override() {
        let storage = Arc::new(InMemoryManualOverrideStorage::new());
        let user = HackleUser::with_id("user-1").build();
        assert_that!(resolve_key(storage, 2, &user)).is_equal_to(Ok(None));
    }

    #[test]
    fn user_override() {
        let storage = Arc::new(InMemoryManualOverrideStorage::new());
        let user = HackleUser::with_id("overridden-user").build();
        assert_that!(resolve_key(storage, 2, &user)).is_equal_to(Ok(Some("A".to_string())));
    }

    #[test]
    fn manual_override_comes_first() {
        let storage = Arc::new(InMemoryManualOverrideStorage::new());
        storage.set(1002, "overridden-user", 2002);
        let user = HackleUser::with_id("overridden-user").build();
        assert_that!(resolve_key(storage, 2, &user)).is_equal_to(Ok(Some("B".to_string())));
    }

    #[test]
    fn manual_override_to_unknown_variation_is_skipped() {
        let storage = Arc::new(InMemoryManualOverrideStorage::new());
        storage.set(1002, "overridden-user", 9999);
        let user = HackleUser::with_id("overridden-user").build();
        assert_that!(resolve_key(storage, 2, &user)).is_equal_to(Ok(Some("A".to_string())));
    }

    #[test]
    fn segment_override() {
        let storage = Arc::new(InMemoryManualOverrideStorage::new());
        let user = HackleUser::with_id("user-1").property("grade", "GOLD").build();
        assert_that!(resolve_key(storage, 2, &user)).is_equal_to(Ok(Some("A".to_string())));
    }
}
