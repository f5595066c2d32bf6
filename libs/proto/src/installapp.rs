//! `installapp.Installapp` service.

use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{IntoRequest, Response, Status};

const INSTALL_APP: &str = "/installapp.Installapp/InstallApp";
const UNINSTALL_APP: &str = "/installapp.Installapp/UninstallApp";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstallAppRequest {
    /// Context ID of the tree to apply.
    #[prost(string, tag = "1")]
    pub app_context: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstallAppResponse {
    #[prost(bool, tag = "1")]
    pub app_context_installed: bool,
    #[prost(string, tag = "2")]
    pub app_context_install_message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UninstallAppRequest {
    #[prost(string, tag = "1")]
    pub app_context: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UninstallAppResponse {
    #[prost(bool, tag = "1")]
    pub app_context_uninstalled: bool,
    #[prost(string, tag = "2")]
    pub app_context_uninstall_message: ::prost::alloc::string::String,
}

/// Client for the install service over a tonic channel.
#[derive(Debug, Clone)]
pub struct InstallappClient {
    inner: tonic::client::Grpc<Channel>,
}

impl InstallappClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn install_app(
        &mut self,
        request: impl IntoRequest<InstallAppRequest>,
    ) -> Result<Response<InstallAppResponse>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;
        let codec: ProstCodec<InstallAppRequest, InstallAppResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(INSTALL_APP);
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn uninstall_app(
        &mut self,
        request: impl IntoRequest<UninstallAppRequest>,
    ) -> Result<Response<UninstallAppResponse>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;
        let codec: ProstCodec<UninstallAppRequest, UninstallAppResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(UNINSTALL_APP);
        self.inner.unary(request.into_request(), path, codec).await
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_install_request_field_tag() {
        let req = InstallAppRequest {
            app_context: "ctx".to_string(),
        };
        // field 1, wire type 2 (length-delimited), length 3
        assert_eq!(req.encode_to_vec(), vec![0x0a, 0x03, b'c', b't', b'x']);
    }

    #[test]
    fn test_install_response_decodes_status_and_message() {
        // field 1 = true, field 2 = "ok"
        let bytes = [0x08, 0x01, 0x12, 0x02, b'o', b'k'];
        let resp = InstallAppResponse::decode(&bytes[..]).unwrap();
        assert!(resp.app_context_installed);
        assert_eq!(resp.app_context_install_message, "ok");
    }
}
