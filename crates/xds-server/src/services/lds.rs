//! Listener Discovery Service (LDS) implementation.
//!
//! LDS provides listener configuration to data-plane nodes.

use async_trait::async_trait;
use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use xds_core::TypeUrl;
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use super::{DiscoveryResponseStream, ServiceState};
use crate::multiplexer::{configs, DiscoveryRequestStream};

/// Listener Discovery Service.
#[derive(Debug, Clone)]
pub struct LdsService {
    state: ServiceState,
}

impl LdsService {
    /// Create a new LDS service.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Get the type URL for listeners.
    #[inline]
    pub fn type_url() -> &'static str {
        TypeUrl::LISTENER
    }
}

/// Trait for LDS service implementation.
#[async_trait]
pub trait ListenerDiscoveryService: Send + Sync + 'static {
    /// Server streaming response type.
    type StreamListenersStream: Stream<Item = Result<DiscoveryResponse, Status>> + Send + 'static;

    /// Stream listeners to the client.
    async fn stream_listeners(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamListenersStream>, Status>;

    /// Fetch listeners (unary RPC).
    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status>;
}

#[async_trait]
impl ListenerDiscoveryService for LdsService {
    type StreamListenersStream = DiscoveryResponseStream;

    #[instrument(skip(self, request), name = "lds_stream")]
    async fn stream_listeners(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamListenersStream>, Status> {
        info!("LDS stream accepted");
        Ok(Response::new(
            self.state.spawn_stream(configs::LDS, request.into_inner()),
        ))
    }

    #[instrument(skip(self, request), name = "lds_fetch")]
    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        let response = self.state.fetch(configs::LDS, request.get_ref())?;
        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use xds_cache::ResourceVersionStore;
    use xds_core::ResourceRegistry;

    use super::*;
    use crate::ServerConfig;

    #[test]
    fn lds_type_url() {
        assert_eq!(LdsService::type_url(), TypeUrl::LISTENER);
    }

    #[tokio::test]
    async fn lds_fetch_with_empty_store_is_up_to_date() {
        let service = LdsService::new(ServiceState::new(
            Arc::new(ResourceVersionStore::new()),
            Arc::new(ResourceRegistry::with_default_types()),
            ServerConfig::default(),
        ));
        let request = DiscoveryRequest {
            node: Some(xds_types::envoy::config::core::v3::Node {
                id: "node-1".into(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let status = service
            .fetch_listeners(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);
    }
}
