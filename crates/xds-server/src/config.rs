//! Server configuration.

use std::time::Duration;

/// Default interval nodes are asked to report load at.
pub const DEFAULT_LOAD_REPORTING_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for the management plane.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Outbound response buffer per stream.
    pub response_buffer_size: usize,
    /// Mark every push as canary.
    pub canary: bool,
    /// End the stream when a canary push is rejected.
    pub terminate_on_canary_failure: bool,
    /// Identifier stamped on responses, if any.
    pub control_plane_id: Option<String>,
    /// Interval handed to nodes on the load-reporting stream.
    pub load_reporting_interval: Duration,
    /// Clusters nodes should report on; empty means all.
    pub load_report_clusters: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            response_buffer_size: 16,
            canary: false,
            terminate_on_canary_failure: false,
            control_plane_id: None,
            load_reporting_interval: DEFAULT_LOAD_REPORTING_INTERVAL,
            load_report_clusters: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Session policy derived from this configuration.
    pub fn session_policy(&self) -> crate::SessionPolicy {
        crate::SessionPolicy {
            canary: self.canary,
            terminate_on_canary_failure: self.terminate_on_canary_failure,
        }
    }
}
