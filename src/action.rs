use std::sync::Arc;

use crate::bucket::Bucketer;
use crate::error::{Error, Result};
use crate::eval::ExperimentRequest;
use crate::experiment::Variation;
use crate::target::{ActionType, TargetAction};

/// Resolves a [TargetAction] to one of the requested experiment's variations.
#[derive(Clone)]
pub struct ActionResolver {
    bucketer: Arc<dyn Bucketer>,
}

impl ActionResolver {
    pub fn new(bucketer: Arc<dyn Bucketer>) -> Self {
        Self { bucketer }
    }

    /// Returns None when a bucket action leaves the user unallocated or the user lacks the
    /// experiment's identifier.
    pub fn resolve<'a>(
        &self,
        request: &ExperimentRequest<'a>,
        action: &TargetAction,
    ) -> Result<Option<&'a Variation>> {
        match action.action_type {
            ActionType::Variation => self.resolve_variation(request, action).map(Some),
            ActionType::Bucket => self.resolve_bucket(request, action),
        }
    }

    fn resolve_variation<'a>(
        &self,
        request: &ExperimentRequest<'a>,
        action: &TargetAction,
    ) -> Result<&'a Variation> {
        let experiment = request.experiment;
        let variation_id = action
            .variation_id
            .ok_or_else(|| Error::InvalidAction(format!("variation id [{}]", experiment.id)))?;
        experiment
            .variation_by_id(variation_id)
            .ok_or(Error::VariationNotFound {
                experiment_id: experiment.id,
                variation_id,
            })
    }

    fn resolve_bucket<'a>(
        &self,
        request: &ExperimentRequest<'a>,
        action: &TargetAction,
    ) -> Result<Option<&'a Variation>> {
        let experiment = request.experiment;
        let bucket_id = action
            .bucket_id
            .ok_or_else(|| Error::InvalidAction(format!("bucket id [{}]", experiment.id)))?;
        let bucket = request
            .workspace
            .bucket(bucket_id)
            .ok_or(Error::BucketNotFound(bucket_id))?;

        let identifier = match request.user.identifier(&experiment.identifier_type) {
            Some(identifier) => identifier,
            None => return Ok(None),
        };

        Ok(self
            .bucketer
            .bucketing(bucket, identifier)
            .and_then(|slot| experiment.variation_by_id(slot.variation_id)))
    }
}
