//! The per-instantiation context handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use emco_id::{ContextId, Handle};
use tracing::{debug, info, warn};

use crate::db::ContextDb;
use crate::error::ContextError;
use crate::tree::{
    CompositeAppMeta, ContextStatus, ContextTree, InstructionKind, InstructionScope, NodeKind,
};
use crate::ContextResult;

/// One instantiation's context tree, written through to a [`ContextDb`].
///
/// Every mutation is validated against the in-memory tree first and then
/// persisted. If the write fails the in-memory tree is reloaded from the
/// store so the two never disagree.
///
/// Between [`defer_writes`](Self::defer_writes) and [`flush`](Self::flush)
/// mutations stay in memory and are persisted as one write.
pub struct AppContext {
    db: Arc<dyn ContextDb>,
    tree: Option<ContextTree>,
    deferred: bool,
    dirty: bool,
}

impl AppContext {
    /// Create an uninitialized context bound to a store.
    pub fn new(db: Arc<dyn ContextDb>) -> Self {
        Self {
            db,
            tree: None,
            deferred: false,
            dirty: false,
        }
    }

    /// Rehydrate a previously persisted context.
    pub fn load_context(db: Arc<dyn ContextDb>, id: &ContextId) -> ContextResult<Self> {
        let blob = db
            .get(id)?
            .ok_or_else(|| ContextError::NotFound(format!("context {id}")))?;
        let tree: ContextTree = serde_json::from_str(&blob)?;
        if tree.id() != *id {
            return Err(ContextError::InvalidArgument(format!(
                "stored context {} does not match requested {id}",
                tree.id()
            )));
        }
        debug!(context_id = %id, nodes = tree.node_count(), "Loaded context");
        Ok(Self {
            db,
            tree: Some(tree),
            deferred: false,
            dirty: false,
        })
    }

    /// Start a fresh tree and persist its root.
    pub fn init_context(&mut self) -> ContextResult<(ContextId, Handle)> {
        if let Some(tree) = &self.tree {
            return Err(ContextError::AlreadyInitialized(tree.id().to_string()));
        }
        let tree = ContextTree::new(ContextId::new());
        self.save(&tree)?;
        let id = tree.id();
        self.tree = Some(tree);
        debug!(context_id = %id, "Initialized context");
        Ok((id, Handle::ROOT))
    }

    pub fn context_id(&self) -> ContextResult<ContextId> {
        Ok(self.tree()?.id())
    }

    /// Read-only view of the underlying tree.
    pub fn tree(&self) -> ContextResult<&ContextTree> {
        self.tree.as_ref().ok_or(ContextError::NotInitialized)
    }

    fn save(&self, tree: &ContextTree) -> ContextResult<()> {
        let blob = serde_json::to_string(tree)?;
        self.db.put(&tree.id(), &blob)?;
        Ok(())
    }

    fn commit<T>(
        &mut self,
        op: impl FnOnce(&mut ContextTree) -> ContextResult<T>,
    ) -> ContextResult<T> {
        let tree = self.tree.as_mut().ok_or(ContextError::NotInitialized)?;
        let out = op(tree)?;
        self.dirty = true;
        if !self.deferred {
            self.persist()?;
        }
        Ok(out)
    }

    fn persist(&mut self) -> ContextResult<()> {
        let tree = self.tree()?;
        if let Err(e) = self.save(tree) {
            self.rollback();
            return Err(e);
        }
        self.dirty = false;
        Ok(())
    }

    /// Hold mutations in memory until the next [`flush`](Self::flush).
    pub fn defer_writes(&mut self) {
        self.deferred = true;
    }

    /// Persist held mutations and go back to writing through.
    ///
    /// On failure the in-memory tree reverts to the last persisted copy, so
    /// everything since [`defer_writes`](Self::defer_writes) is lost.
    pub fn flush(&mut self) -> ContextResult<()> {
        self.deferred = false;
        if !self.dirty {
            return Ok(());
        }
        self.persist()
    }

    /// Replace the in-memory tree with the last persisted copy.
    fn rollback(&mut self) {
        let Some(id) = self.tree.as_ref().map(|t| t.id()) else {
            return;
        };
        let restored = self
            .db
            .get(&id)
            .ok()
            .flatten()
            .and_then(|blob| serde_json::from_str::<ContextTree>(&blob).ok());
        match restored {
            Some(tree) => {
                self.tree = Some(tree);
                self.dirty = false;
            }
            None => warn!(context_id = %id, "Could not restore context after failed write"),
        }
    }

    pub fn create_composite_app(&mut self) -> ContextResult<Handle> {
        self.commit(|t| t.create_composite_app())
    }

    pub fn composite_app_handle(&self) -> ContextResult<Handle> {
        self.tree()?.composite_app()
    }

    pub fn set_composite_app_meta(
        &mut self,
        handle: Handle,
        meta: CompositeAppMeta,
    ) -> ContextResult<()> {
        if meta.project.is_empty() || meta.composite_app.is_empty() {
            return Err(ContextError::InvalidArgument(
                "composite app meta needs a project and a composite app".to_string(),
            ));
        }
        self.commit(|t| t.set_meta(handle, meta))
    }

    pub fn composite_app_meta(&self) -> ContextResult<&CompositeAppMeta> {
        self.tree()?
            .meta()
            .ok_or_else(|| ContextError::NotFound("composite app meta".to_string()))
    }

    pub fn set_status(&mut self, status: ContextStatus) -> ContextResult<()> {
        self.commit(|t| {
            t.set_status(status);
            Ok(())
        })
    }

    pub fn status(&self) -> ContextResult<Option<ContextStatus>> {
        Ok(self.tree()?.status())
    }

    pub fn add_app(&mut self, composite: Handle, app: &str) -> ContextResult<Handle> {
        self.commit(|t| t.add_app(composite, app))
    }

    /// Add a cluster keyed `provider+cluster` under an app.
    pub fn add_cluster(&mut self, app: Handle, cluster: &str) -> ContextResult<Handle> {
        self.commit(|t| t.add_cluster(app, cluster))
    }

    pub fn tag_cluster_group(&mut self, cluster: Handle, group: &str) -> ContextResult<()> {
        self.commit(|t| t.tag_cluster_group(cluster, group))
    }

    pub fn add_resource(
        &mut self,
        cluster: Handle,
        name: &str,
        content: &str,
    ) -> ContextResult<Handle> {
        self.commit(|t| t.add_resource(cluster, name, content))
    }

    pub fn add_instruction(
        &mut self,
        parent: Handle,
        scope: InstructionScope,
        kind: InstructionKind,
        payload: &str,
    ) -> ContextResult<()> {
        self.commit(|t| t.add_instruction(parent, scope, kind, payload))
    }

    pub fn get_app_handle(&self, app: &str) -> ContextResult<Handle> {
        if app.is_empty() {
            return Err(ContextError::InvalidArgument("empty app name".to_string()));
        }
        let tree = self.tree()?;
        tree.find_child(tree.composite_app()?, NodeKind::App, app)
            .ok_or_else(|| ContextError::NotFound(format!("app '{app}'")))
    }

    pub fn get_cluster_handle(&self, app: &str, cluster: &str) -> ContextResult<Handle> {
        if cluster.is_empty() {
            return Err(ContextError::InvalidArgument("empty cluster name".to_string()));
        }
        let app_handle = self.get_app_handle(app)?;
        self.tree()?
            .find_child(app_handle, NodeKind::Cluster, cluster)
            .ok_or_else(|| ContextError::NotFound(format!("cluster '{cluster}' of app '{app}'")))
    }

    pub fn get_resource_handle(
        &self,
        app: &str,
        cluster: &str,
        resource: &str,
    ) -> ContextResult<Handle> {
        if resource.is_empty() {
            return Err(ContextError::InvalidArgument("empty resource name".to_string()));
        }
        let cluster_handle = self.get_cluster_handle(app, cluster)?;
        self.tree()?
            .find_child(cluster_handle, NodeKind::Resource, resource)
            .ok_or_else(|| {
                ContextError::NotFound(format!(
                    "resource '{resource}' on cluster '{cluster}' of app '{app}'"
                ))
            })
    }

    /// Cluster keys of an app tagged with `group`, in insertion order.
    pub fn get_cluster_group_members(&self, app: &str, group: &str) -> ContextResult<Vec<String>> {
        if group.is_empty() {
            return Err(ContextError::InvalidArgument("empty cluster group".to_string()));
        }
        let members: Vec<String> = self
            .cluster_group_map(app)?
            .remove(group)
            .unwrap_or_default();
        if members.is_empty() {
            return Err(ContextError::NotFound(format!(
                "cluster group '{group}' of app '{app}'"
            )));
        }
        Ok(members)
    }

    /// All groups of an app and their member cluster keys.
    pub fn cluster_group_map(&self, app: &str) -> ContextResult<BTreeMap<String, Vec<String>>> {
        let app_handle = self.get_app_handle(app)?;
        let tree = self.tree()?;
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for cluster in tree.children(app_handle, NodeKind::Cluster)? {
            if let Some(group) = tree.group(cluster)? {
                groups
                    .entry(group.to_string())
                    .or_default()
                    .push(tree.name(cluster)?.to_string());
            }
        }
        Ok(groups)
    }

    pub fn app_names(&self) -> ContextResult<Vec<String>> {
        let tree = self.tree()?;
        self.names(tree.composite_app()?, NodeKind::App)
    }

    pub fn cluster_names(&self, app: &str) -> ContextResult<Vec<String>> {
        self.names(self.get_app_handle(app)?, NodeKind::Cluster)
    }

    pub fn resource_names(&self, app: &str, cluster: &str) -> ContextResult<Vec<String>> {
        self.names(self.get_cluster_handle(app, cluster)?, NodeKind::Resource)
    }

    fn names(&self, parent: Handle, kind: NodeKind) -> ContextResult<Vec<String>> {
        let tree = self.tree()?;
        tree.children(parent, kind)?
            .into_iter()
            .map(|h| tree.name(h).map(str::to_string))
            .collect()
    }

    /// Content stored on a resource node.
    pub fn value(&self, handle: Handle) -> ContextResult<&str> {
        self.tree()?.value(handle)
    }

    pub fn app_instruction(&self, kind: InstructionKind) -> ContextResult<&str> {
        let tree = self.tree()?;
        tree.instruction(tree.composite_app()?, InstructionScope::App, kind)
    }

    pub fn resource_instruction(
        &self,
        app: &str,
        cluster: &str,
        kind: InstructionKind,
    ) -> ContextResult<&str> {
        let cluster_handle = self.get_cluster_handle(app, cluster)?;
        self.tree()?
            .instruction(cluster_handle, InstructionScope::Resource, kind)
    }

    /// Remove the whole tree from the store, then from memory.
    ///
    /// If the store delete fails the in-memory tree is kept so the caller
    /// can retry.
    pub fn delete_composite_app(&mut self) -> ContextResult<()> {
        let id = self.context_id()?;
        self.db.delete(&id)?;
        self.tree = None;
        self.deferred = false;
        self.dirty = false;
        info!(context_id = %id, "Deleted context");
        Ok(())
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("context_id", &self.tree.as_ref().map(|t| t.id()))
            .finish()
    }
}
