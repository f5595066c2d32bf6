//! `contextupdate.Contextupdate` service implemented by controllers.

use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{IntoRequest, Response, Status};

const UPDATE_APP_CONTEXT: &str = "/contextupdate.Contextupdate/UpdateAppContext";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContextUpdateRequest {
    #[prost(string, tag = "1")]
    pub app_context: ::prost::alloc::string::String,
    /// Name of the controller's intent inside the deployment intent group.
    #[prost(string, tag = "2")]
    pub intent_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContextUpdateResponse {
    #[prost(bool, tag = "1")]
    pub app_context_updated: bool,
    #[prost(string, tag = "2")]
    pub app_context_update_message: ::prost::alloc::string::String,
}

#[derive(Debug, Clone)]
pub struct ContextupdateClient {
    inner: tonic::client::Grpc<Channel>,
}

impl ContextupdateClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn update_app_context(
        &mut self,
        request: impl IntoRequest<ContextUpdateRequest>,
    ) -> Result<Response<ContextUpdateResponse>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;
        let codec: ProstCodec<ContextUpdateRequest, ContextUpdateResponse> =
            ProstCodec::default();
        let path = PathAndQuery::from_static(UPDATE_APP_CONTEXT);
        self.inner.unary(request.into_request(), path, codec).await
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_update_request_carries_intent_name_as_field_two() {
        let req = ContextUpdateRequest {
            app_context: "c".to_string(),
            intent_name: "i".to_string(),
        };
        assert_eq!(req.encode_to_vec(), vec![0x0a, 0x01, b'c', 0x12, 0x01, b'i']);
    }
}
