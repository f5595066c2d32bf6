//! In-process fakes and fixtures for driving the orchestrator without
//! external services.

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use emco_appcontext::{ContextDb, ContextDbError, ContextId, MemoryContextDb};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::metadata::{InMemoryMetadataStore, MetadataResult};
use crate::model::{
    App, AppContent, AppIntent, AppIntentSpec, AppProfileContent, CompositeApp,
    CompositeAppSpec, Controller, DeploymentIntentGroup, DeploymentIntentGroupKey,
    DeploymentIntentGroupSpec, Intent, IntentList, Metadata, Project, GENERIC_PLACEMENT_INTENT,
};
use crate::placement::{AllOf, PlacementIntent};
use crate::render::ChartRenderer;
use crate::rpc::{ControllerClient, InstallClient, RpcError, RpcResult, RSYNC};
use crate::Orchestrator;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install client that records calls and optionally refuses installs.
#[derive(Default)]
pub struct RecordingInstallClient {
    installs: Mutex<Vec<ContextId>>,
    uninstalls: Mutex<Vec<ContextId>>,
    refuse_with: Option<String>,
}

impl RecordingInstallClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every install with `installed = false`.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            refuse_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn installs(&self) -> Vec<ContextId> {
        lock(&self.installs).clone()
    }

    pub fn uninstalls(&self) -> Vec<ContextId> {
        lock(&self.uninstalls).clone()
    }
}

#[async_trait]
impl InstallClient for RecordingInstallClient {
    async fn install_app(&self, context_id: &ContextId) -> RpcResult<()> {
        lock(&self.installs).push(*context_id);
        match &self.refuse_with {
            Some(message) => Err(RpcError::Rejected {
                target: RSYNC.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn uninstall_app(&self, context_id: &ContextId) -> RpcResult<()> {
        lock(&self.uninstalls).push(*context_id);
        Ok(())
    }
}

/// A recorded controller call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerCall {
    pub controller: String,
    pub intent_name: String,
    pub context_id: ContextId,
}

#[derive(Default)]
pub struct RecordingControllerClient {
    calls: Mutex<Vec<ControllerCall>>,
}

impl RecordingControllerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ControllerClient for RecordingControllerClient {
    async fn update_app_context(
        &self,
        controller: &Controller,
        intent_name: &str,
        context_id: &ContextId,
    ) -> RpcResult<()> {
        lock(&self.calls).push(ControllerCall {
            controller: controller.name().to_string(),
            intent_name: intent_name.to_string(),
            context_id: *context_id,
        });
        Ok(())
    }
}

/// Memory store whose writes fail once the tree mentions a marker, and
/// which counts deletes.
pub struct FaultyContextDb {
    inner: MemoryContextDb,
    fail_marker: Option<String>,
    deletes: AtomicUsize,
}

impl FaultyContextDb {
    pub fn new() -> Self {
        Self {
            inner: MemoryContextDb::new(),
            fail_marker: None,
            deletes: AtomicUsize::new(0),
        }
    }

    /// Fail any write whose serialized tree contains `marker`.
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            ..Self::new()
        }
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

impl Default for FaultyContextDb {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextDb for FaultyContextDb {
    fn put(&self, id: &ContextId, tree: &str) -> Result<(), ContextDbError> {
        if let Some(marker) = &self.fail_marker {
            if tree.contains(marker.as_str()) {
                return Err(ContextDbError::Unavailable(format!("injected failure on {marker}")));
            }
        }
        self.inner.put(id, tree)
    }

    fn get(&self, id: &ContextId) -> Result<Option<String>, ContextDbError> {
        self.inner.get(id)
    }

    fn delete(&self, id: &ContextId) -> Result<(), ContextDbError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id)
    }
}

/// Build a gzip tarball from `(path, content)` pairs.
pub fn package(files: &[(&str, &str)]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, content.as_bytes())?;
    }
    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    encoder.finish()
}

/// A chart for `app` holding one Deployment.
pub fn deployment_chart(app: &str) -> std::io::Result<Vec<u8>> {
    let values = "replicas: 1\nimage: nginx\n";
    let deployment = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ .Release.Name }}-web\nspec:\n  replicas: {{ .Values.replicas }}\n  template:\n    spec:\n      containers:\n        - name: web\n          image: {{ .Values.image }}\n";
    let (values_path, deployment_path, notes_path) = (
        format!("{app}/values.yaml"),
        format!("{app}/templates/deployment.yaml"),
        format!("{app}/templates/NOTES.txt"),
    );
    package(&[
        (values_path.as_str(), values),
        (deployment_path.as_str(), deployment),
        (notes_path.as_str(), "installed"),
    ])
}

/// A profile with no values file and no extra resources.
pub fn empty_profile() -> std::io::Result<Vec<u8>> {
    package(&[("manifest.yaml", "version: v1\n")])
}

/// The single-app scenario used across tests:
/// project `p1`, composite app `ca` v1, app `app1` placed on `aws+edge1`,
/// group `dig` with profile `prof` and release `r1`, in `Created` state.
pub struct Scenario {
    pub store: Arc<InMemoryMetadataStore>,
    pub key: DeploymentIntentGroupKey,
}

impl Scenario {
    pub async fn seed() -> MetadataResult<Self> {
        Self::seed_with_placement(PlacementIntent {
            all_of: vec![AllOf {
                provider_name: "aws".to_string(),
                cluster_name: "edge1".to_string(),
                ..Default::default()
            }],
            any_of: Vec::new(),
        })
        .await
    }

    pub async fn seed_with_placement(intent: PlacementIntent) -> MetadataResult<Self> {
        Self::seed_into(Arc::new(InMemoryMetadataStore::new()), intent, Vec::new()).await
    }

    /// Seed into an existing store, recording extra `(controller, intent)`
    /// pairs after the generic placement intent.
    pub async fn seed_into(
        store: Arc<InMemoryMetadataStore>,
        intent: PlacementIntent,
        extra_intents: Vec<(String, String)>,
    ) -> MetadataResult<Self> {
        store
            .add_project(Project {
                metadata: Metadata::named("p1"),
            })
            .await?;
        let composite = store
            .add_composite_app(
                "p1",
                CompositeApp {
                    metadata: Metadata::named("ca"),
                    spec: CompositeAppSpec {
                        version: "v1".to_string(),
                    },
                },
            )
            .await?;

        store
            .add_app(
                &composite,
                App {
                    metadata: Metadata::named("app1"),
                },
                AppContent {
                    file_content: STANDARD.encode(deployment_chart("app1")?),
                },
            )
            .await?;
        store
            .add_app_profile(
                &composite,
                "prof",
                "app1",
                AppProfileContent {
                    profile: STANDARD.encode(empty_profile()?),
                },
            )
            .await?;

        let mut intents = vec![Intent {
            intent_type: GENERIC_PLACEMENT_INTENT.to_string(),
            intent_name: "gpi".to_string(),
        }];
        intents.extend(extra_intents.into_iter().map(|(intent_type, intent_name)| Intent {
            intent_type,
            intent_name,
        }));
        let key = store
            .add_deployment_intent_group(
                &composite,
                DeploymentIntentGroup {
                    metadata: Metadata::named("dig"),
                    spec: DeploymentIntentGroupSpec {
                        profile: "prof".to_string(),
                        version: "r1".to_string(),
                        override_values: Vec::new(),
                    },
                },
                IntentList(intents),
            )
            .await?;
        store
            .add_app_intent(
                &key,
                "gpi",
                AppIntent {
                    metadata: Metadata::named("app1-placement"),
                    spec: AppIntentSpec {
                        app_name: "app1".to_string(),
                        intent,
                    },
                },
            )
            .await?;

        Ok(Self { store, key })
    }

    /// An orchestrator over this scenario's store with the chart renderer.
    pub fn orchestrator(
        &self,
        contexts: Arc<dyn ContextDb>,
        installer: Arc<dyn InstallClient>,
        controllers: Arc<dyn ControllerClient>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            self.store.clone(),
            Arc::new(ChartRenderer::default()),
            contexts,
            installer,
            controllers,
        )
    }
}
