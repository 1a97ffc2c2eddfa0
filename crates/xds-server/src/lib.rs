//! # xds-server
//!
//! Management plane for xDS.
//!
//! - [`DiscoverySession`] - Per-type ACK/NACK state machine
//! - [`DiscoveryMultiplexer`] - One stream fanned out into per-type sessions
//! - [`services`] - Aggregated, single-type and load-reporting services
//! - [`XdsServer`] / [`XdsServerBuilder`] - Wiring of store, registry and
//!   configuration into services
//! - [`XdsMetrics`] - Counters and gauges through the `metrics` facade
//!
//! The services are generic over the inbound request stream; binding them
//! to a network transport is left to the embedding application.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use xds_cache::ResourceVersionStore;
//! use xds_server::XdsServer;
//!
//! let store = Arc::new(ResourceVersionStore::new());
//! let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
//!
//! let _ads = server.ads();
//! let _lds = server.lds();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
pub mod metrics;
mod multiplexer;
mod session;
mod stream;
mod utils;


pub mod services;

pub use builder::XdsServerBuilder;
pub use config::{ServerConfig, DEFAULT_LOAD_REPORTING_INTERVAL};
pub use metrics::XdsMetrics;
pub use multiplexer::{configs, DiscoveryMultiplexer, DiscoveryRequestStream, StreamConfig};
pub use session::{DiscoverySession, RequestKind, SessionPolicy, SessionPush, SessionState};
pub use stream::{StreamContext, StreamId};
pub use utils::generate_nonce;

use std::sync::Arc;

use tokio::sync::mpsc;
use xds_cache::ResourceVersionStore;
use xds_core::ResourceRegistry;

use crate::services::{
    AdsService, CdsService, EdsService, LdsService, LoadReport, LrsService, RdsService,
    ServiceState,
};

/// The management plane.
///
/// Holds the store, registry and configuration shared by every service
/// and hands out services bound to them.
#[derive(Debug, Clone)]
pub struct XdsServer {
    state: ServiceState,
}

impl XdsServer {
    pub(crate) fn new(
        store: Arc<ResourceVersionStore>,
        registry: Arc<ResourceRegistry>,
        config: ServerConfig,
        enable_metrics: bool,
    ) -> Self {
        let state = ServiceState::new(store, registry, config);
        let state = if enable_metrics {
            state.with_metrics(XdsMetrics::new())
        } else {
            state
        };
        Self { state }
    }

    /// Create a new builder for configuring the server.
    pub fn builder() -> XdsServerBuilder {
        XdsServerBuilder::new()
    }

    /// Get a reference to the store.
    #[inline]
    pub fn store(&self) -> &Arc<ResourceVersionStore> {
        &self.state.store
    }

    /// Get a reference to the resource registry.
    #[inline]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.state.registry
    }

    /// Get the server configuration.
    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the metrics instance, if enabled.
    #[inline]
    pub fn metrics(&self) -> Option<&XdsMetrics> {
        self.state.metrics.as_ref()
    }

    /// Shared state of the discovery services.
    pub fn service_state(&self) -> &ServiceState {
        &self.state
    }

    /// Aggregated Discovery Service.
    pub fn ads(&self) -> AdsService {
        AdsService::new(self.state.clone())
    }

    /// Listener Discovery Service.
    pub fn lds(&self) -> LdsService {
        LdsService::new(self.state.clone())
    }

    /// Cluster Discovery Service.
    pub fn cds(&self) -> CdsService {
        CdsService::new(self.state.clone())
    }

    /// Endpoint Discovery Service.
    pub fn eds(&self) -> EdsService {
        EdsService::new(self.state.clone())
    }

    /// Route Discovery Service.
    pub fn rds(&self) -> RdsService {
        RdsService::new(self.state.clone())
    }

    /// Load Reporting Service forwarding reports to `sink`.
    pub fn lrs(&self, sink: mpsc::Sender<LoadReport>) -> LrsService {
        let lrs = LrsService::new(Arc::clone(&self.state.config), sink);
        match &self.state.metrics {
            Some(metrics) => lrs.with_metrics(metrics.clone()),
            None => lrs,
        }
    }
}
