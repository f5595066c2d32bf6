//! Persisted instantiation contexts.
//!
//! An [`AppContext`] records, for one instantiation of a composite app, which
//! resources go to which clusters and in what order. The record is a tree:
//!
//! ```text
//! root (context id)
//! └── composite app            meta, status, app-level instructions
//!     └── app
//!         └── cluster          "provider+cluster", optional group tag,
//!             │                resource-level instructions
//!             └── resource     "name+Kind" -> manifest text
//! ```
//!
//! Nodes live in an arena and are addressed by the [`Handle`] returned when
//! they were created. The only path-style lookups are the read-back accessors
//! (`get_*_handle`, `get_cluster_group_members`, ...), which exist for
//! verification and for consumers that rehydrate a context by ID.
//!
//! Every mutation is written through to a [`ContextDb`] as one serialized
//! blob keyed by the context ID, so a context survives the process that built
//! it and is removed as a whole by [`AppContext::delete_composite_app`].

mod context;
pub mod db;
mod error;
mod tree;

pub use context::AppContext;
pub use db::{ContextDb, ContextDbError, MemoryContextDb, SqliteContextDb};
pub use emco_id::{ContextId, Handle};
pub use error::ContextError;
pub use tree::{
    CompositeAppMeta, ContextStatus, ContextTree, InstructionKind, InstructionScope, NodeKind,
};

/// Result type for context operations.
pub type ContextResult<T> = Result<T, ContextError>;
