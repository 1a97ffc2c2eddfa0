//! Route Discovery Service (RDS) implementation.

use async_trait::async_trait;
use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use xds_core::TypeUrl;
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use super::{DiscoveryResponseStream, ServiceState};
use crate::multiplexer::{configs, DiscoveryRequestStream};

/// Route Discovery Service.
#[derive(Debug, Clone)]
pub struct RdsService {
    state: ServiceState,
}

impl RdsService {
    /// Create a new RDS service.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Get the type URL for route configurations.
    #[inline]
    pub fn type_url() -> &'static str {
        TypeUrl::ROUTE
    }
}

/// Trait for RDS service implementation.
#[async_trait]
pub trait RouteDiscoveryService: Send + Sync + 'static {
    /// Server streaming response type.
    type StreamRoutesStream: Stream<Item = Result<DiscoveryResponse, Status>> + Send + 'static;

    /// Stream route configurations to the client.
    async fn stream_routes(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamRoutesStream>, Status>;

    /// Fetch route configurations (unary RPC).
    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status>;
}

#[async_trait]
impl RouteDiscoveryService for RdsService {
    type StreamRoutesStream = DiscoveryResponseStream;

    #[instrument(skip(self, request), name = "rds_stream")]
    async fn stream_routes(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamRoutesStream>, Status> {
        info!("RDS stream accepted");
        Ok(Response::new(
            self.state.spawn_stream(configs::RDS, request.into_inner()),
        ))
    }

    #[instrument(skip(self, request), name = "rds_fetch")]
    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        let response = self.state.fetch(configs::RDS, request.get_ref())?;
        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rds_type_url() {
        assert_eq!(RdsService::type_url(), TypeUrl::ROUTE);
    }
}
