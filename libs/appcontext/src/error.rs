//! Context error types.

use emco_id::Handle;
use thiserror::Error;

use crate::db::ContextDbError;
use crate::tree::NodeKind;

/// Errors from context tree operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The context has not been initialized or has been deleted.
    #[error("context not initialized")]
    NotInitialized,

    /// `init_context` was called twice on the same instance.
    #[error("context already initialized: {0}")]
    AlreadyInitialized(String),

    /// A context, node, or instruction does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A node with the same name already exists under the parent.
    #[error("already exists: {0}")]
    Conflict(String),

    /// The handle was not issued by this context.
    #[error("invalid context handle: {0}")]
    InvalidHandle(Handle),

    /// The handle refers to a node of the wrong kind for the operation.
    #[error("handle {handle} is a {actual} node, expected {expected}")]
    WrongKind {
        handle: Handle,
        expected: NodeKind,
        actual: NodeKind,
    },

    /// An empty name or an unknown instruction scope/kind.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Backing store failure.
    #[error("context store error: {0}")]
    Db(#[from] ContextDbError),

    /// The persisted blob could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ContextError {
    /// Returns true if this error indicates a missing context or node.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotInitialized)
    }
}
