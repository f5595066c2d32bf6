//! Arena representation of a context tree.
//!
//! The tree is a flat map from [`Handle`] to node. Parents keep their
//! children in insertion order, which is the order consumers see them in.
//! Nothing in here touches storage; [`crate::AppContext`] owns persistence.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use emco_id::{ContextId, Handle};
use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::ContextResult;

/// Name of the single composite-app node under the root.
const COMPOSITE_APP_NODE: &str = "compositeapp";

/// Kind of a node in the context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    CompositeApp,
    App,
    Cluster,
    Resource,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::CompositeApp => "composite_app",
            Self::App => "app",
            Self::Cluster => "cluster",
            Self::Resource => "resource",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level an instruction applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionScope {
    /// Ordering of apps within the composite app.
    App,
    /// Ordering of resources within one cluster.
    Resource,
}

impl InstructionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Resource => "resource",
        }
    }

    /// Kind of node that instructions of this scope hang off.
    pub fn parent_kind(&self) -> NodeKind {
        match self {
            Self::App => NodeKind::CompositeApp,
            Self::Resource => NodeKind::Cluster,
        }
    }
}

impl fmt::Display for InstructionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionScope {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "resource" => Ok(Self::Resource),
            other => Err(ContextError::InvalidArgument(format!(
                "not a valid instruction scope: {other}"
            ))),
        }
    }
}

/// Type of instruction payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    Order,
    Dependency,
}

impl InstructionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionKind {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(Self::Order),
            "dependency" => Ok(Self::Dependency),
            other => Err(ContextError::InvalidArgument(format!(
                "not a valid instruction type: {other}"
            ))),
        }
    }
}

/// Identity of the composite app instance a context was built for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompositeAppMeta {
    pub project: String,
    pub composite_app: String,
    pub version: String,
    pub release: String,
}

/// Lifecycle status recorded on the composite-app node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextStatus {
    Pending,
    Instantiating,
    Instantiated,
    InstantiateFailed,
    Terminating,
    Terminated,
    TerminateFailed,
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Instantiating => "Instantiating",
            Self::Instantiated => "Instantiated",
            Self::InstantiateFailed => "InstantiateFailed",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
            Self::TerminateFailed => "TerminateFailed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Instruction {
    scope: InstructionScope,
    kind: InstructionKind,
    payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    kind: NodeKind,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Handle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    instructions: Vec<Instruction>,
}

impl Node {
    fn new(kind: NodeKind, name: &str, parent: Option<Handle>, value: Option<String>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            parent,
            children: Vec::new(),
            value,
            group: None,
            instructions: Vec::new(),
        }
    }
}

/// The arena holding one context's nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTree {
    id: ContextId,
    next: Handle,
    nodes: BTreeMap<Handle, Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<CompositeAppMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<ContextStatus>,
}

impl ContextTree {
    /// Create a tree holding only the root node.
    pub fn new(id: ContextId) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            Handle::ROOT,
            Node::new(NodeKind::Root, &id.to_string(), None, None),
        );
        Self {
            id,
            next: Handle::ROOT.next(),
            nodes,
            meta: None,
            status: None,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Number of nodes including the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, handle: Handle) -> ContextResult<&Node> {
        self.nodes
            .get(&handle)
            .ok_or(ContextError::InvalidHandle(handle))
    }

    fn node_mut(&mut self, handle: Handle) -> ContextResult<&mut Node> {
        self.nodes
            .get_mut(&handle)
            .ok_or(ContextError::InvalidHandle(handle))
    }

    fn expect_kind(&self, handle: Handle, expected: NodeKind) -> ContextResult<&Node> {
        let node = self.node(handle)?;
        if node.kind != expected {
            return Err(ContextError::WrongKind {
                handle,
                expected,
                actual: node.kind,
            });
        }
        Ok(node)
    }

    pub fn kind(&self, handle: Handle) -> ContextResult<NodeKind> {
        Ok(self.node(handle)?.kind)
    }

    pub fn name(&self, handle: Handle) -> ContextResult<&str> {
        Ok(&self.node(handle)?.name)
    }

    pub fn parent(&self, handle: Handle) -> ContextResult<Option<Handle>> {
        Ok(self.node(handle)?.parent)
    }

    /// Children of `parent` with the given kind, in insertion order.
    pub fn children(&self, parent: Handle, kind: NodeKind) -> ContextResult<Vec<Handle>> {
        let node = self.node(parent)?;
        Ok(node
            .children
            .iter()
            .copied()
            .filter(|h| self.nodes.get(h).is_some_and(|n| n.kind == kind))
            .collect())
    }

    pub fn find_child(&self, parent: Handle, kind: NodeKind, name: &str) -> Option<Handle> {
        self.nodes.get(&parent)?.children.iter().copied().find(|h| {
            self.nodes
                .get(h)
                .is_some_and(|n| n.kind == kind && n.name == name)
        })
    }

    fn add_child(
        &mut self,
        parent: Handle,
        kind: NodeKind,
        name: &str,
        value: Option<String>,
    ) -> ContextResult<Handle> {
        if name.is_empty() {
            return Err(ContextError::InvalidArgument(format!("empty {kind} name")));
        }
        let parent_kind = match kind {
            NodeKind::Root => {
                return Err(ContextError::InvalidArgument(
                    "root node cannot be added".to_string(),
                ))
            }
            NodeKind::CompositeApp => NodeKind::Root,
            NodeKind::App => NodeKind::CompositeApp,
            NodeKind::Cluster => NodeKind::App,
            NodeKind::Resource => NodeKind::Cluster,
        };
        self.expect_kind(parent, parent_kind)?;
        if self.find_child(parent, kind, name).is_some() {
            return Err(ContextError::Conflict(format!("{kind} '{name}'")));
        }

        let handle = self.next;
        self.next = handle.next();
        self.nodes
            .insert(handle, Node::new(kind, name, Some(parent), value));
        self.node_mut(parent)?.children.push(handle);
        Ok(handle)
    }

    pub fn create_composite_app(&mut self) -> ContextResult<Handle> {
        self.add_child(Handle::ROOT, NodeKind::CompositeApp, COMPOSITE_APP_NODE, None)
    }

    pub fn composite_app(&self) -> ContextResult<Handle> {
        self.find_child(Handle::ROOT, NodeKind::CompositeApp, COMPOSITE_APP_NODE)
            .ok_or_else(|| ContextError::NotFound("composite app".to_string()))
    }

    pub fn add_app(&mut self, composite: Handle, name: &str) -> ContextResult<Handle> {
        self.add_child(composite, NodeKind::App, name, None)
    }

    pub fn add_cluster(&mut self, app: Handle, key: &str) -> ContextResult<Handle> {
        self.add_child(app, NodeKind::Cluster, key, None)
    }

    pub fn add_resource(
        &mut self,
        cluster: Handle,
        name: &str,
        content: &str,
    ) -> ContextResult<Handle> {
        self.add_child(cluster, NodeKind::Resource, name, Some(content.to_string()))
    }

    pub fn tag_cluster_group(&mut self, cluster: Handle, group: &str) -> ContextResult<()> {
        if group.is_empty() {
            return Err(ContextError::InvalidArgument(
                "empty cluster group".to_string(),
            ));
        }
        self.expect_kind(cluster, NodeKind::Cluster)?;
        self.node_mut(cluster)?.group = Some(group.to_string());
        Ok(())
    }

    pub fn group(&self, cluster: Handle) -> ContextResult<Option<&str>> {
        Ok(self.expect_kind(cluster, NodeKind::Cluster)?.group.as_deref())
    }

    /// Attach an instruction, replacing any earlier one with the same scope and kind.
    pub fn add_instruction(
        &mut self,
        parent: Handle,
        scope: InstructionScope,
        kind: InstructionKind,
        payload: &str,
    ) -> ContextResult<()> {
        self.expect_kind(parent, scope.parent_kind())?;
        let node = self.node_mut(parent)?;
        match node
            .instructions
            .iter_mut()
            .find(|i| i.scope == scope && i.kind == kind)
        {
            Some(existing) => existing.payload = payload.to_string(),
            None => node.instructions.push(Instruction {
                scope,
                kind,
                payload: payload.to_string(),
            }),
        }
        Ok(())
    }

    pub fn instruction(
        &self,
        parent: Handle,
        scope: InstructionScope,
        kind: InstructionKind,
    ) -> ContextResult<&str> {
        self.node(parent)?
            .instructions
            .iter()
            .find(|i| i.scope == scope && i.kind == kind)
            .map(|i| i.payload.as_str())
            .ok_or_else(|| {
                ContextError::NotFound(format!("{scope} {kind} instruction on handle {parent}"))
            })
    }

    /// Number of instructions stored on a node.
    pub fn instruction_count(&self, parent: Handle) -> ContextResult<usize> {
        Ok(self.node(parent)?.instructions.len())
    }

    pub fn value(&self, handle: Handle) -> ContextResult<&str> {
        self.node(handle)?
            .value
            .as_deref()
            .ok_or_else(|| ContextError::NotFound(format!("value of handle {handle}")))
    }

    pub fn set_meta(&mut self, composite: Handle, meta: CompositeAppMeta) -> ContextResult<()> {
        self.expect_kind(composite, NodeKind::CompositeApp)?;
        self.meta = Some(meta);
        Ok(())
    }

    pub fn meta(&self) -> Option<&CompositeAppMeta> {
        self.meta.as_ref()
    }

    pub fn set_status(&mut self, status: ContextStatus) {
        self.status = Some(status);
    }

    pub fn status(&self) -> Option<ContextStatus> {
        self.status
    }
}
