//! gRPC plumbing for the resource synchronizer and controllers.
//!
//! Channels are created lazily and kept in a [`ConnectionPool`] owned by the
//! entry point, keyed by the service name (`rsync` or a controller name).

mod controller;
mod install;

pub use controller::{ControllerClient, GrpcControllerClient};
pub use install::{GrpcInstallClient, InstallClient, RSYNC};

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Default connect timeout for new channels.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no connection registered for {0}")]
    NotRegistered(String),

    #[error("invalid endpoint {endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("{target} did not answer within {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("{target} call failed: {status}")]
    Status {
        target: String,
        status: Box<tonic::Status>,
    },

    #[error("{target} refused the request: {message}")]
    Rejected { target: String, message: String },
}

/// Named, lazily connected channels.
pub struct ConnectionPool {
    channels: RwLock<HashMap<String, Channel>>,
    connect_timeout: Duration,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl ConnectionPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            connect_timeout,
        }
    }

    /// Register (or replace) the channel for `name`. No connection is made
    /// until the first call.
    pub async fn register(&self, name: &str, host: &str, port: u16) -> RpcResult<()> {
        let endpoint = format!("http://{host}:{port}");
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|source| RpcError::Endpoint {
                endpoint: endpoint.clone(),
                source,
            })?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        self.channels.write().await.insert(name.to_string(), channel);
        debug!(name, %endpoint, "Registered channel");
        Ok(())
    }

    /// Register `name` unless it already has a channel.
    pub async fn ensure(&self, name: &str, host: &str, port: u16) -> RpcResult<()> {
        if self.contains(name).await {
            return Ok(());
        }
        self.register(name, host, port).await
    }

    pub async fn channel(&self, name: &str) -> RpcResult<Channel> {
        self.channels
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::NotRegistered(name.to_string()))
    }

    pub async fn remove(&self, name: &str) -> bool {
        self.channels.write().await.remove(name).is_some()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }
}

/// Run a unary call under `timeout`, mapping transport failures.
pub(crate) async fn call<T, F>(target: &str, timeout: Duration, fut: F) -> RpcResult<T>
where
    F: std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    let response = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| RpcError::Timeout {
            target: target.to_string(),
            timeout,
        })?
        .map_err(|status| RpcError::Status {
            target: target.to_string(),
            status: Box::new(status),
        })?;
    Ok(response.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let pool = ConnectionPool::default();
        assert!(matches!(
            pool.channel("rsync").await,
            Err(RpcError::NotRegistered(_))
        ));

        pool.register("rsync", "localhost", 9031).await.unwrap();
        assert!(pool.contains("rsync").await);
        assert!(pool.channel("rsync").await.is_ok());

        assert!(pool.remove("rsync").await);
        assert!(!pool.contains("rsync").await);
    }

    #[tokio::test]
    async fn test_invalid_host_rejected() {
        let pool = ConnectionPool::default();
        let err = pool.register("bad", "not a host", 1).await.unwrap_err();
        assert!(matches!(err, RpcError::Endpoint { .. }));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let never = std::future::pending::<Result<tonic::Response<()>, tonic::Status>>();
        let err = call("rsync", Duration::from_millis(10), never)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
    }
}
