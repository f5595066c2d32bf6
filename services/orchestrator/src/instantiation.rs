//! Deployment intent group instantiation and termination.
//!
//! Instantiation is all or nothing: once the context exists, any failure
//! deletes it before the error is returned.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use emco_appcontext::{AppContext, CompositeAppMeta, ContextDb, ContextId, ContextStatus, Handle};
use tracing::{debug, info, instrument, warn};

use crate::builder::{self, ContextGuard};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metadata::{ClusterLabelLookup, MetadataStore};
use crate::model::{App, DeploymentIntentGroup, DeploymentIntentGroupKey, GENERIC_PLACEMENT_INTENT};
use crate::placement::{self, PlacementError};
use crate::render::TemplateRenderer;
use crate::resources;
use crate::rpc::{ControllerClient, InstallClient};
use crate::scheduler;
use crate::state::State;
use crate::status::{self, DeploymentStatus, StatusQuery};

/// Drives deployment intent groups through their lifecycle.
pub struct Orchestrator {
    metadata: Arc<dyn MetadataStore>,
    labels: Arc<dyn ClusterLabelLookup>,
    renderer: Arc<dyn TemplateRenderer>,
    contexts: Arc<dyn ContextDb>,
    installer: Arc<dyn InstallClient>,
    controllers: Arc<dyn ControllerClient>,
}

impl Orchestrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        labels: Arc<dyn ClusterLabelLookup>,
        renderer: Arc<dyn TemplateRenderer>,
        contexts: Arc<dyn ContextDb>,
        installer: Arc<dyn InstallClient>,
        controllers: Arc<dyn ControllerClient>,
    ) -> Self {
        Self {
            metadata,
            labels,
            renderer,
            contexts,
            installer,
            controllers,
        }
    }

    /// Mark a group ready for instantiation.
    #[instrument(skip(self, key), fields(group = %key))]
    pub async fn approve(&self, key: &DeploymentIntentGroupKey) -> OrchestratorResult<()> {
        let mut state = self.metadata.get_deployment_intent_group_state(key).await?;
        match state.current()? {
            State::Approved => {
                debug!("Group already approved");
                return Ok(());
            }
            State::Instantiated => {
                return Err(OrchestratorError::Conflict(format!(
                    "{key} is instantiated; terminate it before approving again"
                )))
            }
            State::Created | State::Terminated => {}
        }
        state.push(State::Approved, None);
        self.metadata
            .put_deployment_intent_group_state(key, &state)
            .await?;
        info!("Deployment intent group approved");
        Ok(())
    }

    /// Build a context for every app of the group and hand it to the
    /// resource synchronizer.
    #[instrument(skip(self, key), fields(group = %key))]
    pub async fn instantiate(&self, key: &DeploymentIntentGroupKey) -> OrchestratorResult<ContextId> {
        let composite_key = &key.composite;
        self.metadata.get_project(&composite_key.project).await?;
        self.metadata.get_composite_app(composite_key).await?;
        let group = self.metadata.get_deployment_intent_group(key).await?;

        let mut state = self.metadata.get_deployment_intent_group_state(key).await?;
        match state.current()? {
            State::Approved | State::Terminated => {}
            State::Created => {
                return Err(OrchestratorError::InvalidState(format!(
                    "{key} must be approved before it is instantiated"
                )))
            }
            State::Instantiated => {
                return Err(OrchestratorError::Conflict(format!(
                    "{key} is already instantiated"
                )))
            }
        }

        let intents = self.metadata.get_all_intents(key).await?;
        let placement_intent = intents
            .intent_name(GENERIC_PLACEMENT_INTENT)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("generic placement intent of {key}"))
            })?
            .to_string();

        let apps = self.metadata.get_apps(composite_key).await?;
        if apps.is_empty() {
            return Err(OrchestratorError::InvariantViolation(format!(
                "composite app {composite_key} has no apps"
            )));
        }

        let mut ctx = AppContext::new(Arc::clone(&self.contexts));
        let (context_id, _) = ctx.init_context()?;
        let mut guard = ContextGuard::new(&mut ctx);
        let composite = guard.create_composite_app()?;
        guard.set_composite_app_meta(
            composite,
            CompositeAppMeta {
                project: composite_key.project.clone(),
                composite_app: composite_key.composite_app.clone(),
                version: composite_key.version.clone(),
                release: group.spec.version.clone(),
            },
        )?;
        guard.set_status(ContextStatus::Pending)?;
        info!(context_id = %context_id, apps = apps.len(), "Instantiating");

        let deployment_id = resources::deployment_id(&context_id);
        for app in &apps {
            self.add_app(
                &mut guard,
                composite,
                key,
                &group,
                &placement_intent,
                app,
                &deployment_id,
            )
            .await?;
        }
        let app_names: Vec<String> = apps.iter().map(|a| a.metadata.name.clone()).collect();
        builder::add_app_instructions(&mut guard, composite, &app_names)?;

        let controllers = scheduler::prioritize(self.metadata.as_ref(), &intents).await?;
        let mut updated = false;
        for controller in controllers.placement.iter().chain(&controllers.action) {
            let intent_name = intents.intent_name(controller.name()).unwrap_or_default();
            self.controllers
                .update_app_context(controller, intent_name, &context_id)
                .await
                .map_err(|e| {
                    OrchestratorError::external(format!("controller {}", controller.name()), e)
                })?;
            debug!(controller = controller.name(), intent = intent_name, "Controller applied");
            updated = true;
        }
        if updated {
            // Controllers write through the store; pick up their changes.
            *guard = AppContext::load_context(Arc::clone(&self.contexts), &context_id)?;
        }

        guard.set_status(ContextStatus::Instantiating)?;

        // Track the context before the synchronizer can act on it, so an
        // accepted install always leaves the group terminable.
        let previous = state.clone();
        state.push(State::Instantiated, Some(context_id));
        self.metadata
            .put_deployment_intent_group_state(key, &state)
            .await?;

        if let Err(e) = self.installer.install_app(&context_id).await {
            if let Err(restore) = self
                .metadata
                .put_deployment_intent_group_state(key, &previous)
                .await
            {
                // The group still points here; keep the context for terminate.
                guard.disarm();
                warn!(context_id = %context_id, error = %restore, "Failed to restore group state after install failure");
            }
            return Err(OrchestratorError::external(
                format!("installing context {context_id}"),
                e,
            ));
        }
        guard.disarm();

        if let Err(e) = guard.set_status(ContextStatus::Instantiated) {
            warn!(context_id = %context_id, error = %e, "Installed context but failed to record its status");
        }
        info!(context_id = %context_id, "Deployment intent group instantiated");
        Ok(context_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_app(
        &self,
        ctx: &mut AppContext,
        composite: Handle,
        key: &DeploymentIntentGroupKey,
        group: &DeploymentIntentGroup,
        placement_intent: &str,
        app: &App,
        deployment_id: &str,
    ) -> OrchestratorResult<()> {
        let name = app.metadata.name.as_str();
        let composite_key = &key.composite;

        let content = self.metadata.get_app_content(composite_key, name).await?;
        let profile = self
            .metadata
            .get_app_profile_content(composite_key, &group.spec.profile, name)
            .await?;
        let chart = decode_package(name, "chart", &content.file_content)?;
        let profile = decode_package(name, "profile", &profile.profile)?;

        let renderer = Arc::clone(&self.renderer);
        let overrides = group.spec.overrides_for(name);
        let (app_name, release) = (name.to_string(), group.spec.version.clone());
        let rendered = tokio::task::spawn_blocking(move || {
            renderer.resolve(&chart, &profile, &overrides, &app_name, &release)
        })
        .await
        .map_err(|e| OrchestratorError::external(format!("rendering app {name}"), e))?
        .map_err(|e| OrchestratorError::external(format!("rendering app {name}"), e))?;

        let intent = self
            .metadata
            .get_app_intent(key, placement_intent, name)
            .await?;
        let clusters = placement::resolve(&intent.spec.intent, self.labels.as_ref())
            .await
            .map_err(|e| match e {
                PlacementError::InvalidClause(what) => {
                    OrchestratorError::InvariantViolation(format!("app {name}: {what}"))
                }
                other => {
                    OrchestratorError::external(format!("resolving placement of app {name}"), other)
                }
            })?;
        if clusters.is_empty() {
            return Err(OrchestratorError::InvariantViolation(format!(
                "app {name} resolved to no clusters"
            )));
        }

        let mut app_resources = resources::collect_rendered(rendered.templates())
            .map_err(|e| OrchestratorError::external(format!("collecting resources of app {name}"), e))?;
        app_resources.push(resources::build_status_resource(deployment_id, name)?);

        builder::build_app(ctx, composite, name, &clusters, &app_resources)?;
        builder::verify(ctx, name, &clusters, &app_resources)?;
        info!(
            app = name,
            clusters = clusters.cluster_count(),
            resources = app_resources.len(),
            "App placed"
        );
        Ok(())
    }

    /// Uninstall and delete the group's live context.
    #[instrument(skip(self, key), fields(group = %key))]
    pub async fn terminate(&self, key: &DeploymentIntentGroupKey) -> OrchestratorResult<()> {
        let mut state = self.metadata.get_deployment_intent_group_state(key).await?;
        let current = state.current()?;
        if current != State::Instantiated {
            return Err(OrchestratorError::InvalidState(format!(
                "{key} is {current}, not instantiated"
            )));
        }
        let context_id = state.tracked_context()?.ok_or_else(|| {
            OrchestratorError::InvariantViolation(format!("{key} has no tracked context"))
        })?;

        let mut ctx = self.load_context(&context_id)?;
        ctx.set_status(ContextStatus::Terminating)?;
        if let Err(e) = self.installer.uninstall_app(&context_id).await {
            if let Err(status_err) = ctx.set_status(ContextStatus::TerminateFailed) {
                warn!(context_id = %context_id, error = %status_err, "Failed to record termination failure");
            }
            return Err(OrchestratorError::external(
                format!("uninstalling context {context_id}"),
                e,
            ));
        }
        ctx.delete_composite_app()?;

        state.push(State::Terminated, Some(context_id));
        self.metadata
            .put_deployment_intent_group_state(key, &state)
            .await?;
        info!(context_id = %context_id, "Deployment intent group terminated");
        Ok(())
    }

    /// Remove a group that has no live context.
    #[instrument(skip(self, key), fields(group = %key))]
    pub async fn delete_deployment_intent_group(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> OrchestratorResult<()> {
        if let Some(context_id) = self.tracked_context(key).await? {
            return Err(OrchestratorError::Conflict(format!(
                "{key} is instantiated as {context_id}; terminate it first"
            )));
        }
        self.metadata.delete_deployment_intent_group(key).await?;
        info!("Deployment intent group deleted");
        Ok(())
    }

    /// Report the group's state history and, when it has a context, what
    /// was placed where.
    #[instrument(skip(self, key, query), fields(group = %key))]
    pub async fn status(
        &self,
        key: &DeploymentIntentGroupKey,
        query: &StatusQuery,
    ) -> OrchestratorResult<DeploymentStatus> {
        let composite_key = &key.composite;
        let group = self.metadata.get_deployment_intent_group(key).await?;
        let states = self.metadata.get_deployment_intent_group_state(key).await?;
        let apps: Vec<String> = self
            .metadata
            .get_apps(composite_key)
            .await?
            .into_iter()
            .map(|a| a.metadata.name)
            .collect();

        let context_id = match query.instance {
            Some(id) => Some(id),
            None => states.tracked_context()?,
        };
        let (status, placed) = match &context_id {
            Some(id) => {
                let ctx = self.load_context(id)?;
                (ctx.status()?, status::collect_apps(&ctx, &apps, query)?)
            }
            None => (None, Vec::new()),
        };

        Ok(DeploymentStatus {
            project: composite_key.project.clone(),
            composite_app_name: composite_key.composite_app.clone(),
            composite_app_version: composite_key.version.clone(),
            composite_profile_name: group.spec.profile,
            name: key.name.clone(),
            states,
            context_id,
            status,
            apps: placed,
        })
    }

    /// The group's live context, if it is instantiated.
    pub async fn tracked_context(
        &self,
        key: &DeploymentIntentGroupKey,
    ) -> OrchestratorResult<Option<ContextId>> {
        let state = self.metadata.get_deployment_intent_group_state(key).await?;
        Ok(state.tracked_context()?)
    }

    pub fn load_context(&self, context_id: &ContextId) -> OrchestratorResult<AppContext> {
        AppContext::load_context(Arc::clone(&self.contexts), context_id).map_err(|e| {
            if e.is_not_found() {
                OrchestratorError::NotFound(format!("context {context_id}"))
            } else {
                e.into()
            }
        })
    }
}

fn decode_package(app: &str, what: &str, encoded: &str) -> OrchestratorResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| OrchestratorError::external(format!("decoding {what} of app {app}"), e))
}
