//! In-process context store.

use std::collections::HashMap;
use std::sync::RwLock;

use emco_id::ContextId;

use super::{ContextDb, ContextDbError};

/// Context store backed by a lock-protected map. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryContextDb {
    contexts: RwLock<HashMap<ContextId, String>>,
}

impl MemoryContextDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contexts.
    pub fn len(&self) -> usize {
        self.contexts.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContextDb for MemoryContextDb {
    fn put(&self, id: &ContextId, tree: &str) -> Result<(), ContextDbError> {
        let mut contexts = self.contexts.write().map_err(|_| ContextDbError::Poisoned)?;
        contexts.insert(*id, tree.to_string());
        Ok(())
    }

    fn get(&self, id: &ContextId) -> Result<Option<String>, ContextDbError> {
        let contexts = self.contexts.read().map_err(|_| ContextDbError::Poisoned)?;
        Ok(contexts.get(id).cloned())
    }

    fn delete(&self, id: &ContextId) -> Result<(), ContextDbError> {
        let mut contexts = self.contexts.write().map_err(|_| ContextDbError::Poisoned)?;
        contexts.remove(id);
        Ok(())
    }

    fn contains(&self, id: &ContextId) -> Result<bool, ContextDbError> {
        let contexts = self.contexts.read().map_err(|_| ContextDbError::Poisoned)?;
        Ok(contexts.contains_key(id))
    }
}
