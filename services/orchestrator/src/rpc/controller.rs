use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use emco_id::ContextId;
use emco_proto::contextupdate::{ContextUpdateRequest, ContextupdateClient};
use tracing::debug;

use super::{call, ConnectionPool, RpcError, RpcResult};
use crate::model::Controller;

/// Lets a placement or action controller amend a context.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn update_app_context(
        &self,
        controller: &Controller,
        intent_name: &str,
        context_id: &ContextId,
    ) -> RpcResult<()>;
}

/// Controller client dialing each controller's registered host and port.
pub struct GrpcControllerClient {
    pool: Arc<ConnectionPool>,
    timeout: Duration,
}

impl GrpcControllerClient {
    pub fn new(pool: Arc<ConnectionPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl ControllerClient for GrpcControllerClient {
    async fn update_app_context(
        &self,
        controller: &Controller,
        intent_name: &str,
        context_id: &ContextId,
    ) -> RpcResult<()> {
        let name = controller.name();
        self.pool
            .ensure(name, &controller.spec.host, controller.spec.port)
            .await?;
        let mut client = ContextupdateClient::new(self.pool.channel(name).await?);

        let request = ContextUpdateRequest {
            app_context: context_id.to_string(),
            intent_name: intent_name.to_string(),
        };
        let response = call(name, self.timeout, client.update_app_context(request)).await?;
        if !response.app_context_updated {
            return Err(RpcError::Rejected {
                target: name.to_string(),
                message: response.app_context_update_message,
            });
        }
        debug!(controller = name, intent = intent_name, context_id = %context_id, "Controller updated context");
        Ok(())
    }
}
