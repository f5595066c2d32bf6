//! Deployment intent group lifecycle through the public orchestrator API.

use std::sync::Arc;

use emco_appcontext::{ContextId, ContextStatus, InstructionKind, MemoryContextDb};
use emco_orchestrator::metadata::{InMemoryMetadataStore, MetadataStore};
use emco_orchestrator::model::{Controller, ControllerSpec, ControllerType, Metadata};
use emco_orchestrator::placement::{AllOf, PlacementIntent};
use emco_orchestrator::resources::deployment_id;
use emco_orchestrator::state::State;
use emco_orchestrator::status::StatusQuery;
use emco_orchestrator::testkit::{RecordingControllerClient, RecordingInstallClient, Scenario};
use emco_orchestrator::OrchestratorError;

struct Harness {
    scenario: Scenario,
    contexts: Arc<MemoryContextDb>,
    installer: Arc<RecordingInstallClient>,
    controllers: Arc<RecordingControllerClient>,
}

impl Harness {
    async fn new() -> Self {
        Self::with(Scenario::seed().await.unwrap(), RecordingInstallClient::new())
    }

    fn with(scenario: Scenario, installer: RecordingInstallClient) -> Self {
        Self {
            scenario,
            contexts: Arc::new(MemoryContextDb::new()),
            installer: Arc::new(installer),
            controllers: Arc::new(RecordingControllerClient::new()),
        }
    }

    fn orchestrator(&self) -> emco_orchestrator::Orchestrator {
        self.scenario.orchestrator(
            self.contexts.clone(),
            self.installer.clone(),
            self.controllers.clone(),
        )
    }

    async fn state(&self) -> State {
        self.scenario
            .store
            .get_deployment_intent_group_state(&self.scenario.key)
            .await
            .unwrap()
            .current()
            .unwrap()
    }
}

#[tokio::test]
async fn test_approve_instantiate_terminate() {
    let h = Harness::new().await;
    let orch = h.orchestrator();
    let key = &h.scenario.key;

    orch.approve(key).await.unwrap();
    assert_eq!(h.state().await, State::Approved);

    let context_id = orch.instantiate(key).await.unwrap();
    assert_eq!(h.state().await, State::Instantiated);
    assert_eq!(orch.tracked_context(key).await.unwrap(), Some(context_id));
    assert_eq!(h.installer.installs(), vec![context_id]);

    let ctx = orch.load_context(&context_id).unwrap();
    assert_eq!(ctx.status().unwrap(), Some(ContextStatus::Instantiated));
    let meta = ctx.composite_app_meta().unwrap();
    assert_eq!(
        (meta.project.as_str(), meta.composite_app.as_str(), meta.version.as_str(), meta.release.as_str()),
        ("p1", "ca", "v1", "r1")
    );
    assert_eq!(
        ctx.resource_names("app1", "aws+edge1").unwrap(),
        vec![
            "r1-web+Deployment".to_string(),
            format!("{}-app1+ResourceBundleState", deployment_id(&context_id)),
        ]
    );
    assert_eq!(
        ctx.app_instruction(InstructionKind::Order).unwrap(),
        r#"{"apporder":["app1"]}"#
    );

    orch.terminate(key).await.unwrap();
    assert_eq!(h.state().await, State::Terminated);
    assert_eq!(h.installer.uninstalls(), vec![context_id]);
    assert!(h.contexts.is_empty());
    assert!(matches!(
        orch.load_context(&context_id),
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_state_preconditions() {
    let h = Harness::new().await;
    let orch = h.orchestrator();
    let key = &h.scenario.key;

    assert!(matches!(
        orch.instantiate(key).await,
        Err(OrchestratorError::InvalidState(_))
    ));
    assert!(matches!(
        orch.terminate(key).await,
        Err(OrchestratorError::InvalidState(_))
    ));

    orch.approve(key).await.unwrap();
    orch.approve(key).await.unwrap();
    orch.instantiate(key).await.unwrap();

    assert!(matches!(
        orch.instantiate(key).await,
        Err(OrchestratorError::Conflict(_))
    ));
    assert!(matches!(
        orch.approve(key).await,
        Err(OrchestratorError::Conflict(_))
    ));
    assert!(matches!(
        orch.delete_deployment_intent_group(key).await,
        Err(OrchestratorError::Conflict(_))
    ));

    orch.terminate(key).await.unwrap();
    orch.delete_deployment_intent_group(key).await.unwrap();
    assert!(matches!(
        orch.instantiate(key).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reinstantiate_after_terminate() {
    let h = Harness::new().await;
    let orch = h.orchestrator();
    let key = &h.scenario.key;

    orch.approve(key).await.unwrap();
    let first = orch.instantiate(key).await.unwrap();
    orch.terminate(key).await.unwrap();
    let second = orch.instantiate(key).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.installer.installs(), vec![first, second]);
    assert_eq!(h.contexts.len(), 1);
}

#[tokio::test]
async fn test_refused_install_removes_context() {
    let h = Harness::with(
        Scenario::seed().await.unwrap(),
        RecordingInstallClient::refusing("cluster edge1 unreachable"),
    );
    let orch = h.orchestrator();
    let key = &h.scenario.key;
    orch.approve(key).await.unwrap();

    let err = orch.instantiate(key).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::External { .. }));
    assert!(err.to_string().contains("cluster edge1 unreachable"));
    assert_eq!(h.installer.installs().len(), 1);
    assert!(h.contexts.is_empty());
    assert_eq!(h.state().await, State::Approved);
}

#[tokio::test]
async fn test_empty_placement_rejected() {
    let scenario = Scenario::seed_with_placement(PlacementIntent {
        all_of: vec![AllOf {
            provider_name: "aws".to_string(),
            cluster_label_name: "nowhere".to_string(),
            ..Default::default()
        }],
        any_of: Vec::new(),
    })
    .await
    .unwrap();
    scenario
        .store
        .add_cluster("aws", "edge1", &["east"])
        .await
        .unwrap();
    let h = Harness::with(scenario, RecordingInstallClient::new());
    let orch = h.orchestrator();
    orch.approve(&h.scenario.key).await.unwrap();

    let err = orch.instantiate(&h.scenario.key).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::InvariantViolation(_)));
    assert!(h.contexts.is_empty());
    assert!(h.installer.installs().is_empty());
}

#[tokio::test]
async fn test_controllers_run_placement_then_action() {
    let store = Arc::new(InMemoryMetadataStore::new());
    for (name, controller_type, priority) in [
        ("hpa", ControllerType::Action, 1),
        ("sfc", ControllerType::Placement, 9),
        ("affinity", ControllerType::Placement, 3),
    ] {
        store
            .add_controller(Controller {
                metadata: Metadata::named(name),
                spec: ControllerSpec {
                    host: format!("{name}.emco"),
                    port: 9053,
                    controller_type,
                    priority,
                },
            })
            .await
            .unwrap();
    }
    let placement = PlacementIntent {
        all_of: vec![AllOf {
            provider_name: "aws".to_string(),
            cluster_name: "edge1".to_string(),
            ..Default::default()
        }],
        any_of: Vec::new(),
    };
    let extra = ["hpa", "sfc", "affinity"]
        .iter()
        .map(|c| (c.to_string(), format!("{c}-intent")))
        .collect();
    let scenario = Scenario::seed_into(store, placement, extra).await.unwrap();
    let h = Harness::with(scenario, RecordingInstallClient::new());
    let orch = h.orchestrator();
    orch.approve(&h.scenario.key).await.unwrap();

    let context_id = orch.instantiate(&h.scenario.key).await.unwrap();

    let calls = h.controllers.calls();
    let order: Vec<_> = calls
        .iter()
        .map(|c| (c.controller.as_str(), c.intent_name.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("affinity", "affinity-intent"),
            ("sfc", "sfc-intent"),
            ("hpa", "hpa-intent"),
        ]
    );
    assert!(calls.iter().all(|c| c.context_id == context_id));
}

#[tokio::test]
async fn test_status_follows_lifecycle() {
    let h = Harness::new().await;
    let orch = h.orchestrator();
    let key = &h.scenario.key;
    orch.approve(key).await.unwrap();

    let before = orch.status(key, &StatusQuery::default()).await.unwrap();
    assert_eq!(before.context_id, None);
    assert!(before.apps.is_empty());

    let context_id = orch.instantiate(key).await.unwrap();
    let report = orch.status(key, &StatusQuery::default()).await.unwrap();

    assert_eq!(report.name, "dig");
    assert_eq!(report.composite_profile_name, "prof");
    assert_eq!(report.context_id, Some(context_id));
    assert_eq!(report.status, Some(ContextStatus::Instantiated));
    assert_eq!(report.states.current().unwrap(), State::Instantiated);
    assert_eq!(report.apps.len(), 1);
    let cluster = &report.apps[0].clusters[0];
    assert_eq!((cluster.cluster_provider.as_str(), cluster.cluster.as_str()), ("aws", "edge1"));
    let kinds: Vec<_> = cluster.resources.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["Deployment", "ResourceBundleState"]);

    let only_deployment = StatusQuery {
        resources: vec!["r1-web".to_string()],
        ..Default::default()
    };
    let narrowed = orch.status(key, &only_deployment).await.unwrap();
    assert_eq!(narrowed.apps[0].clusters[0].resources.len(), 1);

    orch.terminate(key).await.unwrap();
    let after = orch.status(key, &StatusQuery::default()).await.unwrap();
    assert_eq!(after.context_id, None);
    assert_eq!(after.states.current().unwrap(), State::Terminated);

    let gone = StatusQuery {
        instance: Some(context_id),
        ..Default::default()
    };
    assert!(matches!(
        orch.status(key, &gone).await,
        Err(OrchestratorError::NotFound(_))
    ));
    let unknown = StatusQuery {
        instance: Some(ContextId::new()),
        ..Default::default()
    };
    assert!(orch.status(key, &unknown).await.is_err());
}
