//! Cluster Discovery Service (CDS) implementation.

use async_trait::async_trait;
use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use xds_core::TypeUrl;
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use super::{DiscoveryResponseStream, ServiceState};
use crate::multiplexer::{configs, DiscoveryRequestStream};

/// Cluster Discovery Service.
#[derive(Debug, Clone)]
pub struct CdsService {
    state: ServiceState,
}

impl CdsService {
    /// Create a new CDS service.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Get the type URL for clusters.
    #[inline]
    pub fn type_url() -> &'static str {
        TypeUrl::CLUSTER
    }
}

/// Trait for CDS service implementation.
#[async_trait]
pub trait ClusterDiscoveryService: Send + Sync + 'static {
    /// Server streaming response type.
    type StreamClustersStream: Stream<Item = Result<DiscoveryResponse, Status>> + Send + 'static;

    /// Stream clusters to the client.
    async fn stream_clusters(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamClustersStream>, Status>;

    /// Fetch clusters (unary RPC).
    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status>;
}

#[async_trait]
impl ClusterDiscoveryService for CdsService {
    type StreamClustersStream = DiscoveryResponseStream;

    #[instrument(skip(self, request), name = "cds_stream")]
    async fn stream_clusters(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamClustersStream>, Status> {
        info!("CDS stream accepted");
        Ok(Response::new(
            self.state.spawn_stream(configs::CDS, request.into_inner()),
        ))
    }

    #[instrument(skip(self, request), name = "cds_fetch")]
    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        let response = self.state.fetch(configs::CDS, request.get_ref())?;
        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cds_type_url() {
        assert_eq!(CdsService::type_url(), TypeUrl::CLUSTER);
    }
}
