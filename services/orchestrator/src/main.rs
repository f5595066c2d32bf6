//! emco orchestrator
//!
//! Command-line front end for the instantiation engine. Metadata comes from
//! a JSON catalog; contexts are handed to the resource synchronizer over
//! gRPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use emco_appcontext::{ContextDb, ContextId, MemoryContextDb, SqliteContextDb};
use emco_orchestrator::config::{Config, ContextStoreConfig};
use emco_orchestrator::metadata::InMemoryMetadataStore;
use emco_orchestrator::model::{CompositeAppKey, DeploymentIntentGroupKey};
use emco_orchestrator::render::ChartRenderer;
use emco_orchestrator::rpc::{ConnectionPool, GrpcControllerClient, GrpcInstallClient, RSYNC};
use emco_orchestrator::status::StatusQuery;
use emco_orchestrator::Orchestrator;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about = "Intent-driven multi-cluster instantiation")]
struct Cli {
    /// Metadata catalog (overrides EMCO_CATALOG).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Resource synchronizer host (overrides EMCO_RSYNC_HOST).
    #[arg(long, global = true)]
    rsync_host: Option<String>,

    /// Resource synchronizer port (overrides EMCO_RSYNC_PORT).
    #[arg(long, global = true)]
    rsync_port: Option<u16>,

    /// Persist contexts in this sqlite file instead of the configured store.
    #[arg(long, global = true)]
    context_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GroupArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    composite_app: String,
    #[arg(long = "composite-app-version")]
    version: String,
    /// Deployment intent group name.
    #[arg(long)]
    group: String,
}

impl GroupArgs {
    fn key(&self) -> DeploymentIntentGroupKey {
        CompositeAppKey::new(&self.project, &self.composite_app, &self.version).group(&self.group)
    }
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[command(flatten)]
    group: GroupArgs,
    /// Report on this context instead of the group's live one.
    #[arg(long)]
    instance: Option<ContextId>,
    /// Only these apps (repeatable).
    #[arg(long = "app")]
    apps: Vec<String>,
    /// Only these `provider+cluster` keys (repeatable).
    #[arg(long = "cluster")]
    clusters: Vec<String>,
    /// Only these resources, by object name or `name+Kind` (repeatable).
    #[arg(long = "resource")]
    resources: Vec<String>,
    /// Include resource manifests.
    #[arg(long)]
    detail: bool,
}

impl StatusArgs {
    fn query(&self) -> StatusQuery {
        StatusQuery {
            instance: self.instance,
            apps: self.apps.clone(),
            clusters: self.clusters.clone(),
            resources: self.resources.clone(),
            detail: self.detail,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Approve a deployment intent group.
    Approve(GroupArgs),
    /// Build and install a context for a deployment intent group.
    Instantiate(GroupArgs),
    /// Uninstall and delete the group's context.
    Terminate(GroupArgs),
    /// Delete a deployment intent group that is not instantiated.
    DeleteGroup(GroupArgs),
    /// Print the group's live context as JSON.
    ShowContext(GroupArgs),
    /// Print the group's deployment status as JSON.
    Status(StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }
    if let Some(host) = cli.rsync_host {
        config.rsync_host = host;
    }
    if let Some(port) = cli.rsync_port {
        config.rsync_port = port;
    }
    if let Some(path) = cli.context_db {
        config.context_store = ContextStoreConfig::Sqlite(path);
    }

    // Initialize tracing (prefer RUST_LOG, fallback to EMCO_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let store = Arc::new(
        InMemoryMetadataStore::open(&config.catalog_path)
            .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?,
    );

    let contexts: Arc<dyn ContextDb> = match &config.context_store {
        ContextStoreConfig::Memory => {
            warn!("Contexts are kept in memory and are lost when the process exits");
            Arc::new(MemoryContextDb::new())
        }
        ContextStoreConfig::Sqlite(path) => Arc::new(
            SqliteContextDb::open(path)
                .with_context(|| format!("opening context store {}", path.display()))?,
        ),
    };

    let pool = Arc::new(ConnectionPool::default());
    pool.register(RSYNC, &config.rsync_host, config.rsync_port)
        .await?;
    info!(rsync = %format!("{}:{}", config.rsync_host, config.rsync_port), "Configuration loaded");

    let orchestrator = Orchestrator::new(
        store.clone(),
        store,
        Arc::new(ChartRenderer::new(config.namespace.clone())),
        contexts,
        Arc::new(GrpcInstallClient::new(pool.clone(), config.rpc_timeout)),
        Arc::new(GrpcControllerClient::new(pool, config.rpc_timeout)),
    );

    match cli.command {
        Command::Approve(group) => {
            orchestrator.approve(&group.key()).await?;
            println!("approved {}", group.key());
        }
        Command::Instantiate(group) => {
            let context_id = orchestrator.instantiate(&group.key()).await?;
            println!("{context_id}");
        }
        Command::Terminate(group) => {
            orchestrator.terminate(&group.key()).await?;
            println!("terminated {}", group.key());
        }
        Command::DeleteGroup(group) => {
            orchestrator
                .delete_deployment_intent_group(&group.key())
                .await?;
            println!("deleted {}", group.key());
        }
        Command::ShowContext(group) => {
            let key = group.key();
            let context_id = orchestrator
                .tracked_context(&key)
                .await?
                .with_context(|| format!("{key} is not instantiated"))?;
            let ctx = orchestrator.load_context(&context_id)?;
            println!("{}", serde_json::to_string_pretty(ctx.tree()?)?);
        }
        Command::Status(args) => {
            let report = orchestrator
                .status(&args.group.key(), &args.query())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
