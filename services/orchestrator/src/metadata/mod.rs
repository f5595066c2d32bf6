//! Metadata store seam.
//!
//! The engine only reads the entities it needs and writes group state. The
//! document store behind a real deployment is out of scope; the in-memory
//! catalog here serves the CLI and tests.

mod memory;

pub use memory::{Catalog, InMemoryMetadataStore};

use async_trait::async_trait;

use crate::model::{
    App, AppContent, AppIntent, AppProfileContent, CompositeApp, CompositeAppKey, Controller,
    DeploymentIntentGroup, DeploymentIntentGroupKey, IntentList, Project,
};
use crate::state::StateInfo;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("invalid metadata: {0}")]
    Invalid(String),

    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog format error: {0}")]
    Format(#[from] serde_json::Error),
}

impl MetadataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Read access to metadata entities plus group state writes.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_project(&self, project: &str) -> MetadataResult<Project>;

    async fn get_composite_app(&self, key: &CompositeAppKey) -> MetadataResult<CompositeApp>;

    /// Apps of a composite app, in definition order.
    async fn get_apps(&self, key: &CompositeAppKey) -> MetadataResult<Vec<App>>;

    async fn get_app_content(&self, key: &CompositeAppKey, app: &str)
        -> MetadataResult<AppContent>;

    async fn get_app_profile_content(
        &self,
        key: &CompositeAppKey,
        profile: &str,
        app: &str,
    ) -> MetadataResult<AppProfileContent>;

    async fn get_deployment_intent_group(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> MetadataResult<DeploymentIntentGroup>;

    async fn get_deployment_intent_group_state(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> MetadataResult<StateInfo>;

    async fn put_deployment_intent_group_state(
        &self,
        key: &DeploymentIntentGroupKey,
        state: &StateInfo,
    ) -> MetadataResult<()>;

    async fn delete_deployment_intent_group(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> MetadataResult<()>;

    async fn get_all_intents(&self, key: &DeploymentIntentGroupKey) -> MetadataResult<IntentList>;

    /// The app's placement expression under the named generic placement intent.
    async fn get_app_intent(
        &self,
        key: &DeploymentIntentGroupKey,
        placement_intent: &str,
        app: &str,
    ) -> MetadataResult<AppIntent>;

    async fn get_controller(&self, name: &str) -> MetadataResult<Controller>;

    async fn get_controllers(&self) -> MetadataResult<Vec<Controller>>;
}

/// Expands a cluster label into cluster names.
#[async_trait]
pub trait ClusterLabelLookup: Send + Sync {
    /// Names of the provider's clusters carrying `label`, in registry order.
    async fn clusters_with_label(&self, provider: &str, label: &str)
        -> MetadataResult<Vec<String>>;
}
