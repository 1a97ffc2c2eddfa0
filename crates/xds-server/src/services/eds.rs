//! Endpoint Discovery Service (EDS) implementation.
//!
//! EDS serves `ClusterLoadAssignment` resources: per-locality endpoints,
//! failover endpoints and the drop-overload policy of each cluster.

use async_trait::async_trait;
use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use xds_core::TypeUrl;
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use super::{DiscoveryResponseStream, ServiceState};
use crate::multiplexer::{configs, DiscoveryRequestStream};

/// Endpoint Discovery Service.
#[derive(Debug, Clone)]
pub struct EdsService {
    state: ServiceState,
}

impl EdsService {
    /// Create a new EDS service.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Get the type URL for endpoint assignments.
    #[inline]
    pub fn type_url() -> &'static str {
        TypeUrl::ENDPOINT
    }
}

/// Trait for EDS service implementation.
#[async_trait]
pub trait EndpointDiscoveryService: Send + Sync + 'static {
    /// Server streaming response type.
    type StreamEndpointsStream: Stream<Item = Result<DiscoveryResponse, Status>> + Send + 'static;

    /// Stream endpoint assignments to the client.
    async fn stream_endpoints(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamEndpointsStream>, Status>;

    /// Fetch endpoint assignments (unary RPC).
    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status>;
}

#[async_trait]
impl EndpointDiscoveryService for EdsService {
    type StreamEndpointsStream = DiscoveryResponseStream;

    #[instrument(skip(self, request), name = "eds_stream")]
    async fn stream_endpoints(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamEndpointsStream>, Status> {
        info!("EDS stream accepted");
        Ok(Response::new(
            self.state.spawn_stream(configs::EDS, request.into_inner()),
        ))
    }

    #[instrument(skip(self, request), name = "eds_fetch")]
    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        let response = self.state.fetch(configs::EDS, request.get_ref())?;
        Ok(Response::new(response))
    }
}
