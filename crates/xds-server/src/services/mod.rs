//! Discovery and load-reporting services.
//!
//! - Aggregated Discovery Service (ADS)
//! - Cluster Discovery Service (CDS)
//! - Listener Discovery Service (LDS)
//! - Route Discovery Service (RDS)
//! - Endpoint Discovery Service (EDS)
//! - Load Reporting Service (LRS)
//!
//! The services are generic over the inbound request stream, so any
//! transport that yields decoded requests can drive them.

pub mod ads;
pub mod cds;
pub mod eds;
pub mod lds;
pub mod lrs;
pub mod rds;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::debug;
use xds_cache::ResourceVersionStore;
use xds_core::{Node, ResourceRegistry, XdsError, XdsResult};
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use crate::config::ServerConfig;
use crate::metrics::XdsMetrics;
use crate::multiplexer::{DiscoveryMultiplexer, DiscoveryRequestStream, StreamConfig};
use crate::session::DiscoverySession;

pub use ads::{AdsService, AggregatedDiscoveryService};
pub use cds::{CdsService, ClusterDiscoveryService};
pub use eds::{EdsService, EndpointDiscoveryService};
pub use lds::{LdsService, ListenerDiscoveryService};
pub use lrs::{LoadReport, LoadReportingService, LoadStatsRequestStream, LrsService};
pub use rds::{RdsService, RouteDiscoveryService};

/// Response stream returned by every discovery service.
pub type DiscoveryResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

/// Shared state for all discovery services.
#[derive(Debug, Clone)]
pub struct ServiceState {
    /// Authoritative resource store.
    pub store: Arc<ResourceVersionStore>,
    /// Resource registry.
    pub registry: Arc<ResourceRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Metrics, if enabled.
    pub metrics: Option<XdsMetrics>,
}

impl ServiceState {
    /// Create new service state.
    pub fn new(
        store: Arc<ResourceVersionStore>,
        registry: Arc<ResourceRegistry>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config: Arc::new(config),
            metrics: None,
        }
    }

    /// Attach metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: XdsMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create a multiplexer for a new stream.
    pub fn multiplexer(&self, stream_config: StreamConfig) -> DiscoveryMultiplexer {
        let mux = DiscoveryMultiplexer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            stream_config,
        );
        match &self.metrics {
            Some(metrics) => mux.with_metrics(metrics.clone()),
            None => mux,
        }
    }

    /// Run a discovery stream on its own task.
    pub fn spawn_stream(
        &self,
        stream_config: StreamConfig,
        requests: DiscoveryRequestStream,
    ) -> DiscoveryResponseStream {
        let (tx, rx) = mpsc::channel(self.config.response_buffer_size.max(1));
        let mux = self.multiplexer(stream_config);
        tokio::spawn(mux.run(requests, tx));
        ReceiverStream::new(rx)
    }

    /// Answer a unary fetch with a one-shot session.
    ///
    /// # Errors
    ///
    /// - [`XdsError::Validation`] when the request carries no valid node
    /// - [`XdsError::InvalidTypeUrl`] when the type is not served
    /// - [`XdsError::UpToDate`] when the node already holds the current
    ///   version for the requested names
    pub fn fetch(
        &self,
        stream_config: StreamConfig,
        request: &DiscoveryRequest,
    ) -> XdsResult<DiscoveryResponse> {
        let node = request
            .node
            .clone()
            .ok_or_else(|| XdsError::validation("", "node", "node is required"))
            .and_then(Node::try_from)?;

        let type_url = stream_config
            .resolve(&request.type_url)
            .filter(|t| self.registry.contains(t.as_str()))
            .ok_or_else(|| XdsError::InvalidTypeUrl {
                type_url: request.type_url.clone(),
                reason: format!("not served by {}", stream_config.service_name),
            })?;

        debug!(
            node_id = %node.id,
            type_url = %type_url,
            version = %request.version_info,
            "{} fetch request",
            stream_config.service_name
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_request(type_url.as_str());
        }

        let mut session = DiscoverySession::new(type_url.clone(), self.config.session_policy());
        session.start();
        session.on_request(request)?;

        let push = session
            .push_if_needed(&self.store)
            .ok_or_else(|| XdsError::UpToDate {
                type_url: type_url.to_string(),
                version: self.store.version(type_url.as_str()).into_inner(),
            })?;
        session.close();

        if let Some(metrics) = &self.metrics {
            metrics.record_push(type_url.as_str(), push.resources.len());
        }
        Ok(push.into_response(self.config.control_plane_id.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use xds_core::{Filter, FilterChain, FilterChainMatch, Listener, Resource, TypeUrl};
    use xds_types::envoy::config::core::v3::Node as WireNode;

    use super::*;
    use crate::multiplexer::configs;

    fn state() -> ServiceState {
        let store = Arc::new(ResourceVersionStore::new());
        store
            .apply(
                TypeUrl::LISTENER,
                "v1",
                vec![Resource::Listener(Listener {
                    name: "ingress".into(),
                    address: SocketAddr::from(([0, 0, 0, 0], 443)),
                    filter_chains: vec![FilterChain {
                        name: String::new(),
                        filter_chain_match: FilterChainMatch::default(),
                        filters: vec![Filter {
                            name: "envoy.filters.network.tcp_proxy".into(),
                            config: Vec::new(),
                            deprecated_v1_type: None,
                        }],
                        tls_context: None,
                    }],
                    use_original_dst: false,
                    per_connection_buffer_limit_bytes: None,
                    bind_to_port: None,
                })],
            )
            .unwrap();
        ServiceState::new(
            store,
            Arc::new(ResourceRegistry::with_default_types()),
            ServerConfig::default(),
        )
    }

    fn fetch_request(version: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: version.into(),
            node: Some(WireNode {
                id: "node-1".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn fetch_returns_current_resources() {
        let state = state();
        let response = state.fetch(configs::LDS, &fetch_request("")).unwrap();
        assert_eq!(response.version_info, "v1");
        assert_eq!(response.resources.len(), 1);
        assert!(!response.nonce.is_empty());
    }

    #[test]
    fn fetch_at_current_version_is_up_to_date() {
        let state = state();
        let err = state.fetch(configs::LDS, &fetch_request("v1")).unwrap_err();
        assert!(matches!(err, XdsError::UpToDate { ref version, .. } if version == "v1"));
    }

    #[test]
    fn fetch_requires_node() {
        let state = state();
        let mut request = fetch_request("");
        request.node = None;
        assert!(matches!(
            state.fetch(configs::LDS, &request),
            Err(XdsError::Validation { .. })
        ));
    }

    #[test]
    fn fetch_rejects_foreign_type() {
        let state = state();
        let mut request = fetch_request("");
        request.type_url = TypeUrl::CLUSTER.into();
        assert!(matches!(
            state.fetch(configs::LDS, &request),
            Err(XdsError::InvalidTypeUrl { .. })
        ));
    }
}
