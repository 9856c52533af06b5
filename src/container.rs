use std::sync::Arc;

use log::debug;
use serde::Deserialize;

use crate::bucket::Bucketer;
use crate::error::{Error, Result};
use crate::eval::ExperimentRequest;
use crate::experiment::Experiment;
use crate::workspace::Workspace;

/// A mutual-exclusion container: users are bucketed into exactly one of its groups.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: i64,
    pub bucket_id: i64,
    pub groups: Vec<ContainerGroup>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContainerGroup {
    pub id: i64,
    /// Member experiment ids.
    pub experiments: Vec<i64>,
}

impl Container {
    pub fn group(&self, group_id: i64) -> Option<&ContainerGroup> {
        self.groups.iter().find(|group| group.id == group_id)
    }
}

/// Decides whether a user is allocated to the container group an experiment belongs to.
#[derive(Clone)]
pub struct ContainerResolver {
    bucketer: Arc<dyn Bucketer>,
}

impl ContainerResolver {
    pub fn new(bucketer: Arc<dyn Bucketer>) -> Self {
        Self { bucketer }
    }

    /// Returns true when the user's slot in the container bucket belongs to a group containing
    /// the requested experiment.
    ///
    /// A missing identifier, an unallocated slot and a slot whose group is not configured all
    /// make the user ineligible. A missing bucket is a configuration error.
    pub fn is_user_in_container_group(
        &self,
        request: &ExperimentRequest,
        container: &Container,
    ) -> Result<bool> {
        let experiment = request.experiment;
        let identifier = match request.user.identifier(&experiment.identifier_type) {
            Some(identifier) => identifier,
            None => return Ok(false),
        };

        let bucket = request
            .workspace
            .bucket(container.bucket_id)
            .ok_or(Error::BucketNotFound(container.bucket_id))?;

        let slot = match self.bucketer.bucketing(bucket, identifier) {
            Some(slot) => slot,
            None => return Ok(false),
        };

        Ok(container
            .group(slot.variation_id)
            .map(|group| group.experiments.contains(&experiment.id))
            .unwrap_or(false))
    }
}

/// Mutual exclusion entry point: resolves the experiment's container, if any, then delegates to
/// [ContainerResolver].
#[derive(Clone)]
pub struct MutualExclusionResolver {
    container_resolver: ContainerResolver,
}

impl MutualExclusionResolver {
    pub fn new(container_resolver: ContainerResolver) -> Self {
        Self { container_resolver }
    }

    /// Experiments without a container are always eligible.
    pub fn is_mutual_exclusion_group(&self, request: &ExperimentRequest) -> Result<bool> {
        let container_id = match request.experiment.container_id {
            Some(container_id) => container_id,
            None => return Ok(true),
        };
        let container = container_of(request.workspace, request.experiment, container_id)?;
        self.container_resolver
            .is_user_in_container_group(request, container)
    }
}

fn container_of<'a>(
    workspace: &'a dyn Workspace,
    experiment: &Experiment,
    container_id: i64,
) -> Result<&'a Container> {
    workspace.container(container_id).ok_or_else(|| {
        debug!(
            "experiment [{}] references missing container [{}]",
            experiment.id,
            container_id
        );
        Error::ContainerNotFound(container_id)
    })
}
