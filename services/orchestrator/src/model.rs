//! Metadata entities read by the instantiation engine.
//!
//! Field names follow the JSON shape the metadata API serves, so a catalog
//! exported from a running deployment can be loaded unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::placement::PlacementIntent;

/// Intent type under which the group's generic placement intent is recorded.
pub const GENERIC_PLACEMENT_INTENT: &str = "generic-placement-intent";

/// Lowest and highest accepted controller priority.
pub const MIN_CONTROLLER_PRIORITY: u32 = 1;
pub const MAX_CONTROLLER_PRIORITY: u32 = 1_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data1: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_data2: String,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeApp {
    pub metadata: Metadata,
    pub spec: CompositeAppSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeAppSpec {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub metadata: Metadata,
}

/// Base64-encoded gzip tarball holding the app's chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppContent {
    pub file_content: String,
}

/// Base64-encoded gzip tarball holding the app's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppProfileContent {
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentIntentGroup {
    pub metadata: Metadata,
    pub spec: DeploymentIntentGroupSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentIntentGroupSpec {
    /// Composite profile used to pick each app's profile package.
    pub profile: String,
    /// Release name used when rendering charts.
    pub version: String,
    #[serde(rename = "override-values", default, skip_serializing_if = "Vec::is_empty")]
    pub override_values: Vec<OverrideValues>,
}

impl DeploymentIntentGroupSpec {
    /// `key=value` overrides for one app, sorted by key.
    pub fn overrides_for(&self, app: &str) -> Vec<String> {
        self.override_values
            .iter()
            .find(|o| o.app_name == app)
            .map(|o| o.values.iter().map(|(k, v)| format!("{k}={v}")).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideValues {
    #[serde(rename = "app-name")]
    pub app_name: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// One `(intent type, intent name)` pair recorded on a group.
///
/// The intent type doubles as the name of the controller handling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub intent_type: String,
    pub intent_name: String,
}

/// A group's intents in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentList(pub Vec<Intent>);

impl IntentList {
    /// Name of the first intent recorded under `intent_type`.
    pub fn intent_name(&self, intent_type: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|i| i.intent_type == intent_type)
            .map(|i| i.intent_name.as_str())
    }

    /// Intent types naming controllers, excluding the generic placement intent.
    pub fn controller_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .map(|i| i.intent_type.as_str())
            .filter(|t| *t != GENERIC_PLACEMENT_INTENT)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intent> {
        self.0.iter()
    }
}

/// Per-app placement expression stored under a generic placement intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntent {
    pub metadata: Metadata,
    pub spec: AppIntentSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntentSpec {
    #[serde(rename = "app-name")]
    pub app_name: String,
    pub intent: PlacementIntent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    Placement,
    Action,
    /// Any type this orchestrator does not schedule.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub metadata: Metadata,
    pub spec: ControllerSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSpec {
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub controller_type: ControllerType,
    /// Lower values run first.
    pub priority: u32,
}

impl Controller {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.metadata.name.is_empty() {
            return Err("controller name is empty".to_string());
        }
        if self.spec.host.is_empty() {
            return Err(format!("controller {} has no host", self.metadata.name));
        }
        if !(MIN_CONTROLLER_PRIORITY..=MAX_CONTROLLER_PRIORITY).contains(&self.spec.priority) {
            return Err(format!(
                "controller {} priority {} outside [{MIN_CONTROLLER_PRIORITY}, {MAX_CONTROLLER_PRIORITY}]",
                self.metadata.name, self.spec.priority
            ));
        }
        Ok(())
    }
}

/// Identifies a composite app version within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeAppKey {
    pub project: String,
    pub composite_app: String,
    pub version: String,
}

impl CompositeAppKey {
    pub fn new(
        project: impl Into<String>,
        composite_app: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            composite_app: composite_app.into(),
            version: version.into(),
        }
    }

    pub fn group(&self, name: impl Into<String>) -> DeploymentIntentGroupKey {
        DeploymentIntentGroupKey {
            composite: self.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CompositeAppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.composite_app, self.version)
    }
}

/// Identifies a deployment intent group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentIntentGroupKey {
    pub composite: CompositeAppKey,
    pub name: String,
}

impl fmt::Display for DeploymentIntentGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.composite, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_sorted_by_key() {
        let spec: DeploymentIntentGroupSpec = serde_json::from_value(serde_json::json!({
            "profile": "prof",
            "version": "r1",
            "override-values": [
                {"app-name": "other", "values": {"x": "1"}},
                {"app-name": "app1", "values": {"zeta": "1", "alpha": "2"}}
            ]
        }))
        .unwrap();

        assert_eq!(spec.overrides_for("app1"), vec!["alpha=2", "zeta=1"]);
        assert!(spec.overrides_for("missing").is_empty());
    }

    #[test]
    fn test_controller_names_skip_generic_placement() {
        let intents = IntentList(vec![
            Intent {
                intent_type: GENERIC_PLACEMENT_INTENT.into(),
                intent_name: "gpi".into(),
            },
            Intent {
                intent_type: "hpa".into(),
                intent_name: "hpa-intent".into(),
            },
        ]);
        assert_eq!(intents.controller_names().collect::<Vec<_>>(), vec!["hpa"]);
        assert_eq!(intents.intent_name(GENERIC_PLACEMENT_INTENT), Some("gpi"));
    }

    #[test]
    fn test_controller_priority_bounds() {
        let mut c: Controller = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "hpa", "userData1": "u"},
            "spec": {"host": "hpa", "port": 9000, "type": "action", "priority": 0}
        }))
        .unwrap();
        assert_eq!(c.metadata.user_data1, "u");
        assert!(c.validate().is_err());
        c.spec.priority = MAX_CONTROLLER_PRIORITY;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_unknown_controller_type_parses() {
        let spec: ControllerSpec = serde_json::from_value(serde_json::json!({
            "host": "x", "port": 1, "type": "monitor", "priority": 3
        }))
        .unwrap();
        assert_eq!(spec.controller_type, ControllerType::Unknown);
    }
}
