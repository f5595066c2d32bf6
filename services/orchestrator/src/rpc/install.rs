use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use emco_id::ContextId;
use emco_proto::installapp::{InstallAppRequest, InstallappClient, UninstallAppRequest};
use tracing::info;

use super::{call, ConnectionPool, RpcError, RpcResult};

/// Pool key of the resource synchronizer.
pub const RSYNC: &str = "rsync";

/// Hands a finished context to the resource synchronizer.
#[async_trait]
pub trait InstallClient: Send + Sync {
    async fn install_app(&self, context_id: &ContextId) -> RpcResult<()>;

    async fn uninstall_app(&self, context_id: &ContextId) -> RpcResult<()>;
}

pub struct GrpcInstallClient {
    pool: Arc<ConnectionPool>,
    timeout: Duration,
}

impl GrpcInstallClient {
    pub fn new(pool: Arc<ConnectionPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn client(&self) -> RpcResult<InstallappClient> {
        Ok(InstallappClient::new(self.pool.channel(RSYNC).await?))
    }
}

#[async_trait]
impl InstallClient for GrpcInstallClient {
    async fn install_app(&self, context_id: &ContextId) -> RpcResult<()> {
        let mut client = self.client().await?;
        let request = InstallAppRequest {
            app_context: context_id.to_string(),
        };
        let response = call(RSYNC, self.timeout, client.install_app(request)).await?;
        if !response.app_context_installed {
            return Err(RpcError::Rejected {
                target: RSYNC.to_string(),
                message: response.app_context_install_message,
            });
        }
        info!(context_id = %context_id, "Context installed");
        Ok(())
    }

    async fn uninstall_app(&self, context_id: &ContextId) -> RpcResult<()> {
        let mut client = self.client().await?;
        let request = UninstallAppRequest {
            app_context: context_id.to_string(),
        };
        let response = call(RSYNC, self.timeout, client.uninstall_app(request)).await?;
        if !response.app_context_uninstalled {
            return Err(RpcError::Rejected {
                target: RSYNC.to_string(),
                message: response.app_context_uninstall_message,
            });
        }
        info!(context_id = %context_id, "Context uninstalled");
        Ok(())
    }
}
