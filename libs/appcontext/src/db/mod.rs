//! Backing stores for serialized context trees.
//!
//! A store maps a [`ContextId`] to the JSON blob of its tree. Stores are
//! shared between instantiation runs, so every implementation must be
//! `Send + Sync`.

mod memory;
mod sqlite;

pub use memory::MemoryContextDb;
pub use sqlite::SqliteContextDb;

use emco_id::ContextId;
use thiserror::Error;

/// Errors from backing store operations.
#[derive(Debug, Error)]
pub enum ContextDbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("context store lock poisoned")]
    Poisoned,

    #[error("context store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value storage for context blobs.
pub trait ContextDb: Send + Sync {
    /// Insert or replace the blob for a context.
    fn put(&self, id: &ContextId, tree: &str) -> Result<(), ContextDbError>;

    fn get(&self, id: &ContextId) -> Result<Option<String>, ContextDbError>;

    /// Remove a context. Removing an absent context is not an error.
    fn delete(&self, id: &ContextId) -> Result<(), ContextDbError>;

    fn contains(&self, id: &ContextId) -> Result<bool, ContextDbError> {
        Ok(self.get(id)?.is_some())
    }
}
