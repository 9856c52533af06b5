/// Result type used by every fallible evaluation operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the evaluation engine.
///
/// Eligibility outcomes (identifier missing, not allocated, not in target, ...) are never errors;
/// they are terminal decisions carrying a [crate::DecisionReason]. An [Error] means the workspace
/// snapshot is inconsistent, a request cycle was detected, or a schedule could not be decided.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A bucket referenced by an experiment, container or rule is missing from the workspace.
    #[error("bucket [{0}] not found")]
    BucketNotFound(i64),

    /// A container referenced by an experiment is missing from the workspace.
    #[error("container [{0}] not found")]
    ContainerNotFound(i64),

    /// A variation referenced by a rule or override is missing from its experiment.
    #[error("variation [{variation_id}] not found in experiment [{experiment_id}]")]
    VariationNotFound {
        experiment_id: i64,
        variation_id: i64,
    },

    /// A completed experiment has no winner variation.
    #[error("winner variation not found in experiment [{0}]")]
    WinnerVariationNotFound(i64),

    /// A variation references a parameter configuration missing from the workspace.
    #[error("parameter configuration [{0}] not found")]
    ParameterConfigurationNotFound(i64),

    /// A segment condition references a segment missing from the workspace.
    #[error("segment [{0}] not found")]
    SegmentNotFound(String),

    /// A target action is missing the id its type requires.
    #[error("invalid action [{0}]")]
    InvalidAction(String),

    /// A condition key cannot be used where it appears.
    #[error("invalid condition key [{key_type}, {name}]")]
    InvalidConditionKey { key_type: String, name: String },

    /// A flow reached a step whose preconditions do not hold.
    #[error("{0}")]
    InvalidState(String),

    /// A request is already being evaluated higher up in the same call tree.
    #[error("Circular evaluation has occurred [{stack}]")]
    CircularEvaluation { stack: String },

    /// The schedule action determiner could not classify the delay.
    #[error("cannot determine in-app message schedule action [dispatch_id={dispatch_id}, in_app_message_key={in_app_message_key}]")]
    UndeterminableSchedule {
        dispatch_id: String,
        in_app_message_key: i64,
    },

    /// An impression storage or scheduler collaborator failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl Error {
    /// True when the error indicates an inconsistent workspace snapshot that the caller may want
    /// to refetch.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::BucketNotFound(_)
                | Error::ContainerNotFound(_)
                | Error::VariationNotFound { .. }
                | Error::WinnerVariationNotFound(_)
                | Error::ParameterConfigurationNotFound(_)
                | Error::SegmentNotFound(_)
                | Error::InvalidAction(_)
                | Error::InvalidConditionKey { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test_case(Error::BucketNotFound(1), true)]
    #[test_case(Error::ContainerNotFound(1), true)]
    #[test_case(Error::SegmentNotFound("seg".to_string()), true)]
    #[test_case(Error::CircularEvaluation { stack: "".to_string() }, false)]
    #[test_case(Error::InvalidState("".to_string()), false)]
    #[test_case(Error::Storage("".to_string()), false)]
    fn classifies_configuration_errors(error: Error, expected: bool) {
        assert_that!(error.is_configuration_error()).is_equal_to(expected);
    }

    #[test]
    fn schedule_error_carries_the_schedule_key() {
        let error = Error::UndeterminableSchedule {
            dispatch_id: "d-1".to_string(),
            in_app_message_key: 42,
        };
        assert_that!(error.to_string()).contains("in_app_message_key=42");
        assert_that!(error.to_string()).contains("dispatch_id=d-1");
    }
}
