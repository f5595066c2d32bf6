//! Turns rendered templates into named context resources.

use std::fs;
use std::path::PathBuf;

use emco_id::ContextId;
use serde_json::json;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::render::KubernetesResourceTemplate;

/// Joins name parts of cluster and resource keys.
pub const SEPARATOR: &str = "+";

/// Label carried by status resources and matched by their selector.
pub const STATUS_LABEL_KEY: &str = "emco/deployment-id";

pub const STATUS_API_VERSION: &str = "k8splugin.io/v1alpha1";
pub const STATUS_KIND: &str = "ResourceBundleState";

pub type ResourceResult<T> = Result<T, ResourceError>;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("reading template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serializing status resource: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// A manifest destined for every cluster an app is placed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// `<metadata.name>+<kind>`.
    pub name: String,
    pub file_content: String,
}

/// Read rendered templates in order, dropping those with no object in them.
///
/// A template that does not parse names no object and is dropped the same
/// way.
pub fn collect_rendered(templates: &[KubernetesResourceTemplate]) -> ResourceResult<Vec<Resource>> {
    let mut resources = Vec::with_capacity(templates.len());
    for template in templates {
        let content = fs::read_to_string(&template.file_path).map_err(|source| {
            ResourceError::Read {
                path: template.file_path.clone(),
                source,
            }
        })?;
        let name = match resource_name(&content) {
            Ok(name) => name,
            Err(e) => {
                warn!(path = %template.file_path.display(), error = %e, "Template is not a YAML object");
                SEPARATOR.to_string()
            }
        };
        if name == SEPARATOR {
            debug!(path = %template.file_path.display(), "Skipping template with no object");
            continue;
        }
        resources.push(Resource {
            name,
            file_content: content,
        });
    }
    Ok(resources)
}

fn resource_name(content: &str) -> Result<String, serde_yaml::Error> {
    let doc: Value = serde_yaml::from_str(content)?;
    let name = doc
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let kind = doc.get("kind").and_then(Value::as_str).unwrap_or_default();
    Ok(format!("{name}{SEPARATOR}{kind}"))
}

/// Kubernetes-safe deployment id for a context.
///
/// Context ids are upper-case with an underscore, which label values and
/// object names do not accept.
pub fn deployment_id(context_id: &ContextId) -> String {
    format!(
        "{}-{}",
        ContextId::PREFIX,
        context_id.ulid().to_string().to_lowercase()
    )
}

/// The `ResourceBundleState` through which cluster-side status for one app
/// is reported.
pub fn build_status_resource(deployment_id: &str, app: &str) -> ResourceResult<Resource> {
    let label = format!("{deployment_id}-{app}");
    let object = json!({
        "apiVersion": STATUS_API_VERSION,
        "kind": STATUS_KIND,
        "metadata": {
            "name": label,
            "labels": { STATUS_LABEL_KEY: label },
        },
        "spec": {
            "selector": {
                "matchLabels": { STATUS_LABEL_KEY: label },
            },
        },
    });
    Ok(Resource {
        name: format!("{label}{SEPARATOR}{STATUS_KIND}"),
        file_content: serde_yaml::to_string(&object)?,
    })
}
