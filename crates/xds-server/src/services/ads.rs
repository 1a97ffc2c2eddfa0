//! Aggregated Discovery Service (ADS) implementation.
//!
//! ADS multiplexes every resource type over a single stream, so a node
//! can order its subscriptions (clusters before endpoints, listeners
//! before routes) on one connection.

use async_trait::async_trait;
use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use xds_types::envoy::service::discovery::v3::DiscoveryResponse;

use super::{DiscoveryResponseStream, ServiceState};
use crate::multiplexer::{configs, DiscoveryRequestStream};

/// Aggregated Discovery Service.
#[derive(Debug, Clone)]
pub struct AdsService {
    state: ServiceState,
}

impl AdsService {
    /// Create a new ADS service.
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Get a reference to the shared state.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }
}

/// Interface of the aggregated discovery RPC.
#[async_trait]
pub trait AggregatedDiscoveryService: Send + Sync + 'static {
    /// Server streaming response type for StreamAggregatedResources.
    type StreamAggregatedResourcesStream: Stream<Item = Result<DiscoveryResponse, Status>>
        + Send
        + 'static;

    /// Bidirectional streaming RPC for xDS.
    async fn stream_aggregated_resources(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status>;
}

#[async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = DiscoveryResponseStream;

    #[instrument(skip(self, request), name = "ads_stream")]
    async fn stream_aggregated_resources(
        &self,
        request: Request<DiscoveryRequestStream>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!(remote = ?request.remote_addr(), "ADS stream accepted");
        let stream = self.state.spawn_stream(configs::ADS, request.into_inner());
        Ok(Response::new(stream))
    }
}
