//! Context construction for one app.
//!
//! Every resource goes to every resolved cluster, mandatory or grouped.
//! A cluster that resolves more than once gets one node; a later group
//! retags it. A failure part way deletes the whole context before the error
//! is returned; see [`ContextGuard`].

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};

use emco_appcontext::{
    AppContext, ContextError, Handle, InstructionKind, InstructionScope, NodeKind,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::placement::{ClusterList, ClusterRef};
use crate::resources::Resource;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("adding app {app}: {source}")]
    App {
        app: String,
        #[source]
        source: ContextError,
    },

    #[error("adding cluster {} of provider {} to app {app}: {source}", .cluster.cluster, .cluster.provider)]
    Cluster {
        app: String,
        cluster: ClusterRef,
        #[source]
        source: ContextError,
    },

    #[error("tagging cluster {} of provider {} with group {group}: {source}", .cluster.cluster, .cluster.provider)]
    Group {
        cluster: ClusterRef,
        group: String,
        #[source]
        source: ContextError,
    },

    #[error("adding resource {resource} to cluster {} of provider {}: {source}", .cluster.cluster, .cluster.provider)]
    Resource {
        cluster: ClusterRef,
        resource: String,
        #[source]
        source: ContextError,
    },

    #[error("adding {kind} instruction for {target}: {source}")]
    Instruction {
        target: String,
        kind: InstructionKind,
        #[source]
        source: ContextError,
    },

    #[error("verifying app {app}: {source}")]
    Verify {
        app: String,
        #[source]
        source: ContextError,
    },

    #[error("encoding instruction: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Deletes the context it wraps when dropped, unless disarmed.
///
/// Guards nest: an inner guard that already deleted the context leaves the
/// outer one nothing to do.
pub struct ContextGuard<'a> {
    ctx: &'a mut AppContext,
    armed: bool,
}

impl<'a> ContextGuard<'a> {
    pub fn new(ctx: &'a mut AppContext) -> Self {
        Self { ctx, armed: true }
    }

    /// Keep the context.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Deref for ContextGuard<'_> {
    type Target = AppContext;

    fn deref(&self) -> &AppContext {
        self.ctx
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut AppContext {
        self.ctx
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Already deleted, or never initialized.
        let Ok(id) = self.ctx.context_id() else {
            return;
        };
        match self.ctx.delete_composite_app() {
            Ok(()) => info!(context_id = %id, "Context removed after failure"),
            Err(e) => warn!(context_id = %id, error = %e, "Failed to remove context after failure"),
        }
    }
}

#[derive(Serialize)]
struct ResourceOrder<'a> {
    resorder: Vec<&'a str>,
}

#[derive(Serialize)]
struct ResourceDependency<'a> {
    resdependency: BTreeMap<&'a str, &'static str>,
}

#[derive(Serialize)]
struct AppOrder<'a> {
    apporder: Vec<&'a str>,
}

#[derive(Serialize)]
struct AppDependency<'a> {
    appdependency: BTreeMap<&'a str, &'static str>,
}

const NO_DEPENDENCY: &str = "go";

/// Add `app` under the composite app and populate it from `clusters`.
pub fn build_app(
    ctx: &mut AppContext,
    composite: Handle,
    app: &str,
    clusters: &ClusterList,
    resources: &[Resource],
) -> BuildResult<Handle> {
    let mut guard = ContextGuard::new(ctx);

    let order = serde_json::to_string(&ResourceOrder {
        resorder: resources.iter().map(|r| r.name.as_str()).collect(),
    })?;
    let dependency = serde_json::to_string(&ResourceDependency {
        resdependency: resources
            .iter()
            .map(|r| (r.name.as_str(), NO_DEPENDENCY))
            .collect(),
    })?;

    let app_handle = guard
        .add_app(composite, app)
        .map_err(|source| BuildError::App {
            app: app.to_string(),
            source,
        })?;

    let placed = clusters
        .mandatory_clusters
        .iter()
        .map(|c| (c, None::<&str>))
        .chain(clusters.cluster_groups.iter().flat_map(|g| {
            g.optional_clusters
                .iter()
                .map(move |c| (c, Some(g.group_name.as_str())))
        }));
    for (cluster, group) in placed {
        let slot = ClusterSlot {
            app,
            app_handle,
            cluster,
            group,
        };
        place_cluster(&mut guard, &slot, resources, &order, &dependency)?;
    }

    guard.disarm();
    debug!(
        app,
        clusters = clusters.cluster_count(),
        resources = resources.len(),
        "App added to context"
    );
    Ok(app_handle)
}

struct ClusterSlot<'a> {
    app: &'a str,
    app_handle: Handle,
    cluster: &'a ClusterRef,
    group: Option<&'a str>,
}

impl ClusterSlot<'_> {
    fn cluster_error(&self, source: ContextError) -> BuildError {
        BuildError::Cluster {
            app: self.app.to_string(),
            cluster: self.cluster.clone(),
            source,
        }
    }
}

/// Add one cluster with its resources, persisted as a single write.
///
/// A cluster already under the app keeps its node and resources and only
/// takes the group tag.
fn place_cluster(
    ctx: &mut AppContext,
    slot: &ClusterSlot<'_>,
    resources: &[Resource],
    order: &str,
    dependency: &str,
) -> BuildResult<()> {
    let key = slot.cluster.key();
    let existing = ctx
        .tree()
        .map_err(|e| slot.cluster_error(e))?
        .find_child(slot.app_handle, NodeKind::Cluster, &key);
    if existing.is_some() && slot.group.is_none() {
        debug!(app = slot.app, cluster = %key, "Cluster already placed");
        return Ok(());
    }

    ctx.defer_writes();
    let handle = match existing {
        Some(handle) => handle,
        None => ctx
            .add_cluster(slot.app_handle, &key)
            .map_err(|e| slot.cluster_error(e))?,
    };
    if let Some(group) = slot.group {
        ctx.tag_cluster_group(handle, group)
            .map_err(|source| BuildError::Group {
                cluster: slot.cluster.clone(),
                group: group.to_string(),
                source,
            })?;
    }
    if existing.is_none() {
        add_resources(ctx, handle, slot.cluster, resources, order, dependency)?;
    }
    ctx.flush().map_err(|e| slot.cluster_error(e))
}

fn add_resources(
    ctx: &mut AppContext,
    cluster_handle: Handle,
    cluster: &ClusterRef,
    resources: &[Resource],
    order: &str,
    dependency: &str,
) -> BuildResult<()> {
    for resource in resources {
        ctx.add_resource(cluster_handle, &resource.name, &resource.file_content)
            .map_err(|source| BuildError::Resource {
                cluster: cluster.clone(),
                resource: resource.name.clone(),
                source,
            })?;
    }
    for (kind, payload) in [
        (InstructionKind::Order, order),
        (InstructionKind::Dependency, dependency),
    ] {
        ctx.add_instruction(cluster_handle, InstructionScope::Resource, kind, payload)
            .map_err(|source| BuildError::Instruction {
                target: cluster.key(),
                kind,
                source,
            })?;
    }
    Ok(())
}

/// Record app install order and dependencies on the composite app.
pub fn add_app_instructions(
    ctx: &mut AppContext,
    composite: Handle,
    apps: &[String],
) -> BuildResult<()> {
    let mut guard = ContextGuard::new(ctx);
    let order = serde_json::to_string(&AppOrder {
        apporder: apps.iter().map(String::as_str).collect(),
    })?;
    let dependency = serde_json::to_string(&AppDependency {
        appdependency: apps.iter().map(|a| (a.as_str(), NO_DEPENDENCY)).collect(),
    })?;
    for (kind, payload) in [
        (InstructionKind::Order, order),
        (InstructionKind::Dependency, dependency),
    ] {
        guard
            .add_instruction(composite, InstructionScope::App, kind, &payload)
            .map_err(|source| BuildError::Instruction {
                target: "composite app".to_string(),
                kind,
                source,
            })?;
    }
    guard.disarm();
    Ok(())
}

/// Read back every resource and group membership written for `app`.
pub fn verify(
    ctx: &AppContext,
    app: &str,
    clusters: &ClusterList,
    resources: &[Resource],
) -> BuildResult<()> {
    let wrap = |source| BuildError::Verify {
        app: app.to_string(),
        source,
    };
    let all = clusters
        .mandatory_clusters
        .iter()
        .chain(clusters.cluster_groups.iter().flat_map(|g| &g.optional_clusters));
    for cluster in all {
        for resource in resources {
            ctx.get_resource_handle(app, &cluster.key(), &resource.name)
                .map_err(wrap)?;
        }
    }
    // A cluster listed by several groups ends up tagged with the last one.
    let mut tags: HashMap<String, &str> = HashMap::new();
    for group in &clusters.cluster_groups {
        for cluster in &group.optional_clusters {
            tags.insert(cluster.key(), group.group_name.as_str());
        }
    }
    for group in &clusters.cluster_groups {
        let expected: Vec<String> = group
            .optional_clusters
            .iter()
            .map(ClusterRef::key)
            .filter(|key| tags.get(key) == Some(&group.group_name.as_str()))
            .collect();
        if expected.is_empty() {
            continue;
        }
        let members = ctx
            .get_cluster_group_members(app, &group.group_name)
            .map_err(wrap)?;
        if let Some(missing) = expected.iter().find(|key| !members.contains(key)) {
            return Err(wrap(ContextError::NotFound(format!(
                "cluster {missing} in group {}",
                group.group_name
            ))));
        }
    }
    debug!(app, "Context verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use emco_appcontext::{CompositeAppMeta, MemoryContextDb};
    use rstest::rstest;

    use super::*;
    use crate::placement::ClusterGroup;

    fn context() -> (AppContext, Handle) {
        let mut ctx = AppContext::new(Arc::new(MemoryContextDb::new()));
        ctx.init_context().unwrap();
        let composite = ctx.create_composite_app().unwrap();
        ctx.set_composite_app_meta(
            composite,
            CompositeAppMeta {
                project: "p1".into(),
                composite_app: "ca".into(),
                version: "v1".into(),
                release: "r1".into(),
            },
        )
        .unwrap();
        (ctx, composite)
    }

    fn resources(m: usize) -> Vec<Resource> {
        (0..m)
            .map(|i| Resource {
                name: format!("res{i}+ConfigMap"),
                file_content: format!("kind: ConfigMap\nmetadata:\n  name: res{i}\n"),
            })
            .collect()
    }

    fn mandatory(n: usize) -> ClusterList {
        ClusterList {
            mandatory_clusters: (0..n)
                .map(|i| ClusterRef::new("aws", format!("c{i}")))
                .collect(),
            cluster_groups: Vec::new(),
        }
    }

    #[rstest]
    #[case(1, 1)]
    #[case(3, 2)]
    #[case(4, 5)]
    fn test_every_cluster_gets_every_resource(#[case] n: usize, #[case] m: usize) {
        let (mut ctx, composite) = context();
        let clusters = mandatory(n);
        let res = resources(m);

        build_app(&mut ctx, composite, "app1", &clusters, &res).unwrap();

        assert_eq!(ctx.cluster_names("app1").unwrap().len(), n);
        for cluster in &clusters.mandatory_clusters {
            for r in &res {
                let handle = ctx
                    .get_resource_handle("app1", &cluster.key(), &r.name)
                    .unwrap();
                assert_eq!(ctx.value(handle).unwrap(), r.file_content);
            }
        }
        verify(&ctx, "app1", &clusters, &res).unwrap();
    }

    #[test]
    fn test_groups_tagged_and_instructions_written() {
        let (mut ctx, composite) = context();
        let clusters = ClusterList {
            mandatory_clusters: vec![ClusterRef::new("aws", "a")],
            cluster_groups: vec![ClusterGroup {
                group_name: "edge".into(),
                optional_clusters: vec![ClusterRef::new("aws", "e1"), ClusterRef::new("aws", "e2")],
            }],
        };
        let res = resources(2);

        build_app(&mut ctx, composite, "app1", &clusters, &res).unwrap();

        assert_eq!(
            ctx.get_cluster_group_members("app1", "edge").unwrap(),
            vec!["aws+e1", "aws+e2"]
        );
        assert_eq!(
            ctx.resource_instruction("app1", "aws+e2", InstructionKind::Order)
                .unwrap(),
            r#"{"resorder":["res0+ConfigMap","res1+ConfigMap"]}"#
        );
        assert_eq!(
            ctx.resource_instruction("app1", "aws+a", InstructionKind::Dependency)
                .unwrap(),
            r#"{"resdependency":{"res0+ConfigMap":"go","res1+ConfigMap":"go"}}"#
        );
        verify(&ctx, "app1", &clusters, &res).unwrap();
    }

    fn group(name: &str, members: &[&str]) -> ClusterGroup {
        ClusterGroup {
            group_name: name.into(),
            optional_clusters: members.iter().map(|c| ClusterRef::new("aws", *c)).collect(),
        }
    }

    #[test]
    fn test_mandatory_cluster_also_in_group() {
        let (mut ctx, composite) = context();
        let clusters = ClusterList {
            mandatory_clusters: vec![ClusterRef::new("aws", "c1"), ClusterRef::new("aws", "c2")],
            cluster_groups: vec![group("us1", &["c1"])],
        };
        let res = resources(2);

        build_app(&mut ctx, composite, "app1", &clusters, &res).unwrap();

        assert_eq!(ctx.cluster_names("app1").unwrap(), vec!["aws+c1", "aws+c2"]);
        assert_eq!(ctx.resource_names("app1", "aws+c1").unwrap().len(), 2);
        assert_eq!(
            ctx.get_cluster_group_members("app1", "us1").unwrap(),
            vec!["aws+c1"]
        );
        verify(&ctx, "app1", &clusters, &res).unwrap();
    }

    #[test]
    fn test_groups_sharing_a_label() {
        let (mut ctx, composite) = context();
        let clusters = ClusterList {
            mandatory_clusters: Vec::new(),
            cluster_groups: vec![group("us1", &["c1"]), group("us1", &["c1"])],
        };
        let res = resources(1);

        build_app(&mut ctx, composite, "app1", &clusters, &res).unwrap();

        assert_eq!(ctx.cluster_names("app1").unwrap(), vec!["aws+c1"]);
        assert_eq!(
            ctx.get_cluster_group_members("app1", "us1").unwrap(),
            vec!["aws+c1"]
        );
        verify(&ctx, "app1", &clusters, &res).unwrap();
        assert!(ctx.context_id().is_ok());
    }

    #[test]
    fn test_cluster_in_two_groups_keeps_last_tag() {
        let (mut ctx, composite) = context();
        let clusters = ClusterList {
            mandatory_clusters: Vec::new(),
            cluster_groups: vec![group("east", &["c1", "c2"]), group("edge", &["c1"])],
        };
        let res = resources(1);

        build_app(&mut ctx, composite, "app1", &clusters, &res).unwrap();

        assert_eq!(
            ctx.get_cluster_group_members("app1", "east").unwrap(),
            vec!["aws+c2"]
        );
        assert_eq!(
            ctx.get_cluster_group_members("app1", "edge").unwrap(),
            vec!["aws+c1"]
        );
        verify(&ctx, "app1", &clusters, &res).unwrap();
    }

    #[test]
    fn test_app_instructions() {
        let (mut ctx, composite) = context();
        let apps = vec!["web".to_string(), "db".to_string()];
        add_app_instructions(&mut ctx, composite, &apps).unwrap();

        assert_eq!(
            ctx.app_instruction(InstructionKind::Order).unwrap(),
            r#"{"apporder":["web","db"]}"#
        );
        assert_eq!(
            ctx.app_instruction(InstructionKind::Dependency).unwrap(),
            r#"{"appdependency":{"db":"go","web":"go"}}"#
        );
    }

    #[test]
    fn test_duplicate_resource_deletes_context() {
        let (mut ctx, composite) = context();
        let mut res = resources(1);
        res.push(res[0].clone());

        let err = build_app(&mut ctx, composite, "app1", &mandatory(2), &res).unwrap_err();

        match err {
            BuildError::Resource {
                cluster, resource, ..
            } => {
                assert_eq!(cluster, ClusterRef::new("aws", "c0"));
                assert_eq!(resource, "res0+ConfigMap");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ctx.context_id().is_err());
    }

    #[test]
    fn test_guard_disarmed_keeps_context() {
        let (mut ctx, _) = context();
        {
            let mut guard = ContextGuard::new(&mut ctx);
            guard.disarm();
        }
        assert!(ctx.context_id().is_ok());

        {
            let _guard = ContextGuard::new(&mut ctx);
        }
        assert!(ctx.context_id().is_err());
    }
}
