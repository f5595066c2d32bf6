//! Orchestrator error types.

use emco_appcontext::ContextError;
use thiserror::Error;

use crate::builder::BuildError;
use crate::metadata::MetadataError;
use crate::placement::PlacementError;
use crate::render::RenderError;
use crate::resources::ResourceError;
use crate::rpc::RpcError;
use crate::scheduler::SchedulerError;
use crate::state::StateError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The group is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A collaborator failed. `context` names what was being done and for
    /// which app, cluster or resource.
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("building context: {0}")]
    Build(#[from] BuildError),
}

impl OrchestratorError {
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<MetadataError> for OrchestratorError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => Self::NotFound(what),
            MetadataError::Conflict(what) => Self::Conflict(what),
            MetadataError::Invalid(what) => Self::InvariantViolation(what),
            other => Self::external("metadata store", other),
        }
    }
}

impl From<PlacementError> for OrchestratorError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::InvalidClause(what) => Self::InvariantViolation(what),
            other => Self::external("resolving placement", other),
        }
    }
}

impl From<SchedulerError> for OrchestratorError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ControllerNotFound(name) => Self::NotFound(format!("controller {name}")),
            other => Self::external("prioritizing controllers", other),
        }
    }
}

impl From<StateError> for OrchestratorError {
    fn from(err: StateError) -> Self {
        Self::InvariantViolation(err.to_string())
    }
}

impl From<RpcError> for OrchestratorError {
    fn from(err: RpcError) -> Self {
        Self::external("remote call", err)
    }
}

impl From<RenderError> for OrchestratorError {
    fn from(err: RenderError) -> Self {
        Self::external("rendering templates", err)
    }
}

impl From<ResourceError> for OrchestratorError {
    fn from(err: ResourceError) -> Self {
        Self::external("collecting resources", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_errors_keep_their_category() {
        let err: OrchestratorError = MetadataError::NotFound("project p1".into()).into();
        assert!(matches!(err, OrchestratorError::NotFound(ref w) if w == "project p1"));

        let err: OrchestratorError = MetadataError::Conflict("x".into()).into();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[test]
    fn test_external_keeps_source_chain() {
        let err = OrchestratorError::external(
            "installing app1",
            RpcError::Rejected {
                target: "rsync".into(),
                message: "cluster down".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "installing app1: rsync refused the request: cluster down"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
