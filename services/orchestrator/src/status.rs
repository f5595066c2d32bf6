//! Deployment status of a deployment intent group.
//!
//! The report pairs the group's state history with what its context holds:
//! apps, the clusters each app is placed on, and the resources sent there.

use emco_appcontext::{AppContext, ContextResult, ContextStatus};
use emco_id::ContextId;
use serde::Serialize;
use tracing::debug;

use crate::resources::SEPARATOR;
use crate::state::StateInfo;

/// Narrows a status report. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    /// Report on this context instead of the tracked one.
    pub instance: Option<ContextId>,
    pub apps: Vec<String>,
    /// `provider+cluster` keys.
    pub clusters: Vec<String>,
    /// Object names, or full `name+Kind` resource keys.
    pub resources: Vec<String>,
    /// Include each resource's manifest.
    pub detail: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentStatus {
    pub project: String,
    pub composite_app_name: String,
    pub composite_app_version: String,
    pub composite_profile_name: String,
    pub name: String,
    pub states: StateInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ContextStatus>,
    pub apps: Vec<AppStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStatus {
    pub name: String,
    pub clusters: Vec<ClusterStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterStatus {
    pub cluster_provider: String,
    pub cluster: String,
    pub resources: Vec<ResourceStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

fn keep(value: &str, filter: &[String]) -> bool {
    filter.is_empty() || filter.iter().any(|f| f == value)
}

/// Split a `name+Kind` key at its last separator.
fn split_key(key: &str) -> (&str, &str) {
    key.rsplit_once(SEPARATOR).unwrap_or((key, ""))
}

/// List `apps` as placed in `ctx`, filtered by `query`.
///
/// Apps missing from the context are left out.
pub fn collect_apps(
    ctx: &AppContext,
    apps: &[String],
    query: &StatusQuery,
) -> ContextResult<Vec<AppStatus>> {
    let placed = ctx.app_names()?;
    let mut out = Vec::new();
    for app in apps.iter().filter(|a| keep(a, &query.apps)) {
        if !placed.contains(app) {
            debug!(app = %app, "App not in context");
            continue;
        }
        let mut clusters = Vec::new();
        for key in ctx.cluster_names(app)? {
            if !keep(&key, &query.clusters) {
                continue;
            }
            let (provider, cluster) = split_key(&key);
            let mut resources = Vec::new();
            for resource in ctx.resource_names(app, &key)? {
                let (name, kind) = split_key(&resource);
                if !(keep(name, &query.resources) || keep(&resource, &query.resources)) {
                    continue;
                }
                let detail = if query.detail {
                    let handle = ctx.get_resource_handle(app, &key, &resource)?;
                    manifest(ctx.value(handle)?)
                } else {
                    None
                };
                resources.push(ResourceStatus {
                    name: name.to_string(),
                    kind: kind.to_string(),
                    detail,
                });
            }
            clusters.push(ClusterStatus {
                cluster_provider: provider.to_string(),
                cluster: cluster.to_string(),
                resources,
            });
        }
        out.push(AppStatus {
            name: app.clone(),
            clusters,
        });
    }
    Ok(out)
}

fn manifest(content: &str) -> Option<serde_json::Value> {
    match serde_yaml::from_str(content) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "Stored manifest is not YAML");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use emco_appcontext::MemoryContextDb;

    use super::*;

    fn context() -> AppContext {
        let mut ctx = AppContext::new(Arc::new(MemoryContextDb::new()));
        ctx.init_context().unwrap();
        let composite = ctx.create_composite_app().unwrap();
        for app in ["web", "db"] {
            let a = ctx.add_app(composite, app).unwrap();
            for cluster in ["aws+c1", "gcp+c2"] {
                let c = ctx.add_cluster(a, cluster).unwrap();
                ctx.add_resource(
                    c,
                    &format!("{app}+Deployment"),
                    &format!("kind: Deployment\nmetadata:\n  name: {app}\n"),
                )
                .unwrap();
                ctx.add_resource(c, &format!("{app}+Service"), "kind: Service\n")
                    .unwrap();
            }
        }
        ctx
    }

    fn apps() -> Vec<String> {
        vec!["web".to_string(), "db".to_string(), "cache".to_string()]
    }

    #[test]
    fn test_unfiltered_lists_everything_placed() {
        let ctx = context();
        let report = collect_apps(&ctx, &apps(), &StatusQuery::default()).unwrap();

        let names: Vec<_> = report.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["web", "db"]);
        let c = &report[0].clusters[1];
        assert_eq!((c.cluster_provider.as_str(), c.cluster.as_str()), ("gcp", "c2"));
        assert_eq!(c.resources.len(), 2);
        assert_eq!(c.resources[0].kind, "Deployment");
        assert!(c.resources[0].detail.is_none());
    }

    #[test]
    fn test_filters_narrow_each_level() {
        let ctx = context();
        let query = StatusQuery {
            apps: vec!["db".to_string()],
            clusters: vec!["aws+c1".to_string()],
            resources: vec!["db+Service".to_string()],
            ..Default::default()
        };

        let report = collect_apps(&ctx, &apps(), &query).unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].clusters.len(), 1);
        assert_eq!(
            report[0].clusters[0].resources,
            vec![ResourceStatus {
                name: "db".to_string(),
                kind: "Service".to_string(),
                detail: None,
            }]
        );
    }

    #[test]
    fn test_detail_carries_manifest() {
        let ctx = context();
        let query = StatusQuery {
            apps: vec!["web".to_string()],
            resources: vec!["web".to_string()],
            detail: true,
            ..Default::default()
        };

        let report = collect_apps(&ctx, &apps(), &query).unwrap();

        let resource = &report[0].clusters[0].resources[0];
        let detail = resource.detail.as_ref().unwrap();
        assert_eq!(detail["metadata"]["name"], "web");
    }
}
