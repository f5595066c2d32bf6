//! Metadata store backed by a JSON catalog.
//!
//! The catalog is held in memory. When opened from a file, every write is
//! flushed back to that file so group state survives between CLI runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ClusterLabelLookup, MetadataError, MetadataResult, MetadataStore};
use crate::model::{
    App, AppContent, AppIntent, AppProfileContent, CompositeApp, CompositeAppKey, Controller,
    DeploymentIntentGroup, DeploymentIntentGroupKey, IntentList, Project,
};
use crate::state::StateInfo;

/// Everything the store knows, in its on-disk shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub composite_apps: Vec<CatalogCompositeApp>,
    #[serde(default)]
    pub controllers: Vec<Controller>,
    #[serde(default)]
    pub clusters: Vec<CatalogCluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCompositeApp {
    pub project: String,
    #[serde(flatten)]
    pub composite_app: CompositeApp,
    #[serde(default)]
    pub apps: Vec<CatalogApp>,
    #[serde(default)]
    pub deployment_intent_groups: Vec<CatalogGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogApp {
    #[serde(flatten)]
    pub app: App,
    /// Base64 chart tarball.
    pub file_content: String,
    /// Base64 profile tarball per composite profile name.
    #[serde(default)]
    pub profiles: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGroup {
    #[serde(flatten)]
    pub group: DeploymentIntentGroup,
    #[serde(default)]
    pub intents: IntentList,
    #[serde(default)]
    pub app_intents: Vec<CatalogAppIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAppIntent {
    /// Name of the generic placement intent this app intent belongs to.
    pub placement_intent: String,
    #[serde(flatten)]
    pub app_intent: AppIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCluster {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Catalog {
    fn validate(&self) -> MetadataResult<()> {
        let mut seen = std::collections::HashSet::new();
        for controller in &self.controllers {
            controller.validate().map_err(MetadataError::Invalid)?;
            if !seen.insert(controller.name()) {
                return Err(MetadataError::Invalid(format!(
                    "controller {} defined twice",
                    controller.name()
                )));
            }
        }
        Ok(())
    }

    fn composite(&self, key: &CompositeAppKey) -> MetadataResult<&CatalogCompositeApp> {
        self.composite_apps
            .iter()
            .find(|c| {
                c.project == key.project
                    && c.composite_app.metadata.name == key.composite_app
                    && c.composite_app.spec.version == key.version
            })
            .ok_or_else(|| MetadataError::NotFound(format!("composite app {key}")))
    }

    fn composite_mut(&mut self, key: &CompositeAppKey) -> MetadataResult<&mut CatalogCompositeApp> {
        self.composite_apps
            .iter_mut()
            .find(|c| {
                c.project == key.project
                    && c.composite_app.metadata.name == key.composite_app
                    && c.composite_app.spec.version == key.version
            })
            .ok_or_else(|| MetadataError::NotFound(format!("composite app {key}")))
    }

    fn app(&self, key: &CompositeAppKey, app: &str) -> MetadataResult<&CatalogApp> {
        self.composite(key)?
            .apps
            .iter()
            .find(|a| a.app.metadata.name == app)
            .ok_or_else(|| MetadataError::NotFound(format!("app {app} of {key}")))
    }

    fn group(&self, key: &DeploymentIntentGroupKey) -> MetadataResult<&CatalogGroup> {
        self.composite(&key.composite)?
            .deployment_intent_groups
            .iter()
            .find(|g| g.group.metadata.name == key.name)
            .ok_or_else(|| MetadataError::NotFound(format!("deployment intent group {key}")))
    }

    fn group_mut(&mut self, key: &DeploymentIntentGroupKey) -> MetadataResult<&mut CatalogGroup> {
        self.composite_mut(&key.composite)?
            .deployment_intent_groups
            .iter_mut()
            .find(|g| g.group.metadata.name == key.name)
            .ok_or_else(|| MetadataError::NotFound(format!("deployment intent group {key}")))
    }
}

/// In-memory [`MetadataStore`] and [`ClusterLabelLookup`].
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    catalog: RwLock<Catalog>,
    path: Option<PathBuf>,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> MetadataResult<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog: RwLock::new(catalog),
            path: None,
        })
    }

    /// Load a catalog file and write changes back to it.
    pub fn open<P: AsRef<Path>>(path: P) -> MetadataResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&raw)?;
        catalog.validate()?;
        info!(
            path = %path.display(),
            composite_apps = catalog.composite_apps.len(),
            controllers = catalog.controllers.len(),
            "Catalog loaded"
        );
        Ok(Self {
            catalog: RwLock::new(catalog),
            path: Some(path.to_path_buf()),
        })
    }

    /// Copy of the current catalog.
    pub async fn snapshot(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    async fn flush(&self, catalog: &Catalog) -> MetadataResult<()> {
        if let Some(path) = &self.path {
            let raw = serde_json::to_string_pretty(catalog)?;
            tokio::fs::write(path, raw).await?;
            debug!(path = %path.display(), "Catalog written");
        }
        Ok(())
    }

    pub async fn add_project(&self, project: Project) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        if catalog
            .projects
            .iter()
            .any(|p| p.metadata.name == project.metadata.name)
        {
            return Err(MetadataError::Conflict(format!(
                "project {}",
                project.metadata.name
            )));
        }
        catalog.projects.push(project);
        self.flush(&catalog).await
    }

    pub async fn add_composite_app(
        &self,
        project: &str,
        composite_app: CompositeApp,
    ) -> MetadataResult<CompositeAppKey> {
        let key = CompositeAppKey::new(
            project,
            composite_app.metadata.name.clone(),
            composite_app.spec.version.clone(),
        );
        let mut catalog = self.catalog.write().await;
        if !catalog.projects.iter().any(|p| p.metadata.name == project) {
            return Err(MetadataError::NotFound(format!("project {project}")));
        }
        if catalog.composite(&key).is_ok() {
            return Err(MetadataError::Conflict(format!("composite app {key}")));
        }
        catalog.composite_apps.push(CatalogCompositeApp {
            project: project.to_string(),
            composite_app,
            apps: Vec::new(),
            deployment_intent_groups: Vec::new(),
        });
        self.flush(&catalog).await?;
        Ok(key)
    }

    pub async fn add_app(
        &self,
        key: &CompositeAppKey,
        app: App,
        content: AppContent,
    ) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        let composite = catalog.composite_mut(key)?;
        if composite
            .apps
            .iter()
            .any(|a| a.app.metadata.name == app.metadata.name)
        {
            return Err(MetadataError::Conflict(format!(
                "app {} of {key}",
                app.metadata.name
            )));
        }
        composite.apps.push(CatalogApp {
            app,
            file_content: content.file_content,
            profiles: Default::default(),
        });
        self.flush(&catalog).await
    }

    pub async fn add_app_profile(
        &self,
        key: &CompositeAppKey,
        profile: &str,
        app: &str,
        content: AppProfileContent,
    ) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        let entry = catalog
            .composite_mut(key)?
            .apps
            .iter_mut()
            .find(|a| a.app.metadata.name == app)
            .ok_or_else(|| MetadataError::NotFound(format!("app {app} of {key}")))?;
        entry.profiles.insert(profile.to_string(), content.profile);
        self.flush(&catalog).await
    }

    /// Register a group in the `Created` state.
    pub async fn add_deployment_intent_group(
        &self,
        key: &CompositeAppKey,
        group: DeploymentIntentGroup,
        intents: IntentList,
    ) -> MetadataResult<DeploymentIntentGroupKey> {
        let group_key = key.group(group.metadata.name.clone());
        let mut catalog = self.catalog.write().await;
        if catalog.group(&group_key).is_ok() {
            return Err(MetadataError::Conflict(format!(
                "deployment intent group {group_key}"
            )));
        }
        catalog
            .composite_mut(key)?
            .deployment_intent_groups
            .push(CatalogGroup {
                group,
                intents,
                app_intents: Vec::new(),
                state: Some(StateInfo::created()),
            });
        self.flush(&catalog).await?;
        Ok(group_key)
    }

    pub async fn add_app_intent(
        &self,
        key: &DeploymentIntentGroupKey,
        placement_intent: &str,
        app_intent: AppIntent,
    ) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        let group = catalog.group_mut(key)?;
        if group.app_intents.iter().any(|i| {
            i.placement_intent == placement_intent
                && i.app_intent.spec.app_name == app_intent.spec.app_name
        }) {
            return Err(MetadataError::Conflict(format!(
                "app intent for {} under {placement_intent}",
                app_intent.spec.app_name
            )));
        }
        group.app_intents.push(CatalogAppIntent {
            placement_intent: placement_intent.to_string(),
            app_intent,
        });
        self.flush(&catalog).await
    }

    pub async fn add_controller(&self, controller: Controller) -> MetadataResult<()> {
        controller.validate().map_err(MetadataError::Invalid)?;
        let mut catalog = self.catalog.write().await;
        if catalog
            .controllers
            .iter()
            .any(|c| c.name() == controller.name())
        {
            return Err(MetadataError::Conflict(format!(
                "controller {}",
                controller.name()
            )));
        }
        catalog.controllers.push(controller);
        self.flush(&catalog).await
    }

    pub async fn add_cluster(
        &self,
        provider: &str,
        name: &str,
        labels: &[&str],
    ) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        catalog.clusters.push(CatalogCluster {
            provider: provider.to_string(),
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        self.flush(&catalog).await
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_project(&self, project: &str) -> MetadataResult<Project> {
        self.catalog
            .read()
            .await
            .projects
            .iter()
            .find(|p| p.metadata.name == project)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("project {project}")))
    }

    async fn get_composite_app(&self, key: &CompositeAppKey) -> MetadataResult<CompositeApp> {
        Ok(self.catalog.read().await.composite(key)?.composite_app.clone())
    }

    async fn get_apps(&self, key: &CompositeAppKey) -> MetadataResult<Vec<App>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .composite(key)?
            .apps
            .iter()
            .map(|a| a.app.clone())
            .collect())
    }

    async fn get_app_content(
        &self,
        key: &CompositeAppKey,
        app: &str,
    ) -> MetadataResult<AppContent> {
        let catalog = self.catalog.read().await;
        Ok(AppContent {
            file_content: catalog.app(key, app)?.file_content.clone(),
        })
    }

    async fn get_app_profile_content(
        &self,
        key: &CompositeAppKey,
        profile: &str,
        app: &str,
    ) -> MetadataResult<AppProfileContent> {
        let catalog = self.catalog.read().await;
        catalog
            .app(key, app)?
            .profiles
            .get(profile)
            .map(|p| AppProfileContent { profile: p.clone() })
            .ok_or_else(|| MetadataError::NotFound(format!("profile {profile} for app {app}")))
    }

    async fn get_deployment_intent_group(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> MetadataResult<DeploymentIntentGroup> {
        Ok(self.catalog.read().await.group(key)?.group.clone())
    }

    async fn get_deployment_intent_group_state(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> MetadataResult<StateInfo> {
        self.catalog
            .read()
            .await
            .group(key)?
            .state
            .clone()
            .ok_or_else(|| MetadataError::NotFound(format!("state of {key}")))
    }

    async fn put_deployment_intent_group_state(
        &self,
        key: &DeploymentIntentGroupKey,
        state: &StateInfo,
    ) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        catalog.group_mut(key)?.state = Some(state.clone());
        self.flush(&catalog).await
    }

    async fn delete_deployment_intent_group(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> MetadataResult<()> {
        let mut catalog = self.catalog.write().await;
        let composite = catalog.composite_mut(&key.composite)?;
        let before = composite.deployment_intent_groups.len();
        composite
            .deployment_intent_groups
            .retain(|g| g.group.metadata.name != key.name);
        if composite.deployment_intent_groups.len() == before {
            return Err(MetadataError::NotFound(format!(
                "deployment intent group {key}"
            )));
        }
        self.flush(&catalog).await
    }

    async fn get_all_intents(&self, key: &DeploymentIntentGroupKey) -> MetadataResult<IntentList> {
        Ok(self.catalog.read().await.group(key)?.intents.clone())
    }

    async fn get_app_intent(
        &self,
        key: &DeploymentIntentGroupKey,
        placement_intent: &str,
        app: &str,
    ) -> MetadataResult<AppIntent> {
        let catalog = self.catalog.read().await;
        catalog
            .group(key)?
            .app_intents
            .iter()
            .find(|i| i.placement_intent == placement_intent && i.app_intent.spec.app_name == app)
            .map(|i| i.app_intent.clone())
            .ok_or_else(|| {
                MetadataError::NotFound(format!("app intent for {app} under {placement_intent}"))
            })
    }

    async fn get_controller(&self, name: &str) -> MetadataResult<Controller> {
        self.catalog
            .read()
            .await
            .controllers
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(format!("controller {name}")))
    }

    async fn get_controllers(&self) -> MetadataResult<Vec<Controller>> {
        Ok(self.catalog.read().await.controllers.clone())
    }
}

#[async_trait]
impl ClusterLabelLookup for InMemoryMetadataStore {
    async fn clusters_with_label(
        &self,
        provider: &str,
        label: &str,
    ) -> MetadataResult<Vec<String>> {
        let catalog = self.catalog.read().await;
        if !catalog.clusters.iter().any(|c| c.provider == provider) {
            return Err(MetadataError::NotFound(format!("cluster provider {provider}")));
        }
        Ok(catalog
            .clusters
            .iter()
            .filter(|c| c.provider == provider && c.labels.iter().any(|l| l == label))
            .map(|c| c.name.clone())
            .collect())
    }
}
