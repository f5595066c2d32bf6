//! End-to-end instantiation test.
//!
//! Drives one deployment intent group through its lifecycle against the
//! real chart renderer, a catalog file and the sqlite context store:
//!
//! 1. Load the catalog (project `p1`, composite app `ca` v1, app `app1`)
//! 2. Approve and instantiate the group
//! 3. Verify the persisted context places a Deployment and then the
//!    ResourceBundleState on `aws+edge1`
//! 4. Verify exactly one InstallApp call carried the context id
//! 5. Terminate and verify the context is gone
//!
//! ## Running
//!
//! ```bash
//! cargo test -p emco-e2e --test happy_path
//! ```

use std::sync::Arc;

use emco_appcontext::{AppContext, ContextDb, SqliteContextDb};
use emco_orchestrator::metadata::{InMemoryMetadataStore, MetadataStore};
use emco_orchestrator::render::ChartRenderer;
use emco_orchestrator::resources::{deployment_id, STATUS_LABEL_KEY};
use emco_orchestrator::state::State;
use emco_orchestrator::testkit::{RecordingControllerClient, RecordingInstallClient, Scenario};
use emco_orchestrator::Orchestrator;
use tempfile::TempDir;

#[tokio::test]
async fn e2e_instantiate_single_app_on_edge_cluster() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,emco_orchestrator=debug".into()),
        )
        .with_test_writer()
        .try_init();

    let dir = TempDir::new().unwrap();
    let catalog_path = dir.path().join("catalog.json");
    let db_path = dir.path().join("contexts.db");

    // Export the standard scenario to a catalog file and load it back.
    let seeded = Scenario::seed().await.unwrap();
    let catalog = seeded.store.snapshot().await;
    std::fs::write(&catalog_path, serde_json::to_string_pretty(&catalog).unwrap()).unwrap();
    let store = Arc::new(InMemoryMetadataStore::open(&catalog_path).unwrap());
    let key = seeded.key.clone();

    let contexts: Arc<dyn ContextDb> = Arc::new(SqliteContextDb::open(&db_path).unwrap());
    let installer = Arc::new(RecordingInstallClient::new());
    let orch = Orchestrator::new(
        store.clone(),
        store.clone(),
        Arc::new(ChartRenderer::new("edge")),
        contexts,
        installer.clone(),
        Arc::new(RecordingControllerClient::new()),
    );

    orch.approve(&key).await.unwrap();
    let context_id = orch.instantiate(&key).await.unwrap();
    tracing::info!(context_id = %context_id, "Instantiated");

    // Exactly one install, for this context.
    assert_eq!(installer.installs(), vec![context_id]);

    // The context survives a fresh connection to the same file.
    let reopened: Arc<dyn ContextDb> = Arc::new(SqliteContextDb::open(&db_path).unwrap());
    let ctx = AppContext::load_context(reopened, &context_id).unwrap();
    assert_eq!(ctx.app_names().unwrap(), vec!["app1"]);
    assert_eq!(ctx.cluster_names("app1").unwrap(), vec!["aws+edge1"]);

    let status_name = format!("{}-app1", deployment_id(&context_id));
    let names = ctx.resource_names("app1", "aws+edge1").unwrap();
    assert_eq!(
        names,
        vec![
            "r1-web+Deployment".to_string(),
            format!("{status_name}+ResourceBundleState"),
        ]
    );

    let deployment = ctx
        .value(ctx.get_resource_handle("app1", "aws+edge1", &names[0]).unwrap())
        .unwrap();
    assert!(deployment.contains("replicas: 1"));
    assert!(deployment.contains("image: nginx"));

    let status: serde_yaml::Value = serde_yaml::from_str(
        ctx.value(ctx.get_resource_handle("app1", "aws+edge1", &names[1]).unwrap())
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        status["metadata"]["labels"][STATUS_LABEL_KEY].as_str(),
        Some(status_name.as_str())
    );

    // Group state was written back to the catalog file.
    let on_disk = InMemoryMetadataStore::open(&catalog_path).unwrap();
    let state = on_disk.get_deployment_intent_group_state(&key).await.unwrap();
    assert_eq!(state.current().unwrap(), State::Instantiated);
    assert_eq!(state.tracked_context().unwrap(), Some(context_id));

    orch.terminate(&key).await.unwrap();
    assert_eq!(installer.uninstalls(), vec![context_id]);
    let reopened: Arc<dyn ContextDb> = Arc::new(SqliteContextDb::open(&db_path).unwrap());
    assert!(!reopened.contains(&context_id).unwrap());
}
