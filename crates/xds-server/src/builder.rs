//! Server builder for configuring and creating the management plane.

use std::sync::Arc;
use std::time::Duration;

use xds_cache::ResourceVersionStore;
use xds_core::{ResourceRegistry, XdsError, XdsResult};

use crate::config::ServerConfig;
use crate::XdsServer;

/// Builder for creating an [`XdsServer`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use xds_cache::ResourceVersionStore;
/// use xds_server::XdsServerBuilder;
///
/// let store = Arc::new(ResourceVersionStore::new());
/// let server = XdsServerBuilder::new()
///     .store(store)
///     .load_reporting_interval(Duration::from_secs(5))
///     .enable_metrics()
///     .build()
///     .unwrap();
/// assert_eq!(server.config().load_reporting_interval, Duration::from_secs(5));
/// ```
#[derive(Debug, Default)]
pub struct XdsServerBuilder {
    store: Option<Arc<ResourceVersionStore>>,
    registry: Option<Arc<ResourceRegistry>>,
    config: ServerConfig,
    enable_metrics: bool,
}

impl XdsServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store to serve from.
    ///
    /// If not set, an empty store is created.
    pub fn store(mut self, store: Arc<ResourceVersionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the resource registry.
    ///
    /// If not set, the default registry is used.
    pub fn registry(mut self, registry: Arc<ResourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the outbound response buffer per stream.
    pub fn response_buffer_size(mut self, size: usize) -> Self {
        self.config.response_buffer_size = size;
        self
    }

    /// Flag every push as canary.
    pub fn canary(mut self, canary: bool) -> Self {
        self.config.canary = canary;
        self
    }

    /// End streams whose canary push is rejected.
    pub fn terminate_on_canary_failure(mut self, terminate: bool) -> Self {
        self.config.terminate_on_canary_failure = terminate;
        self
    }

    /// Stamp responses with a control plane identifier.
    pub fn control_plane_id(mut self, id: impl Into<String>) -> Self {
        self.config.control_plane_id = Some(id.into());
        self
    }

    /// Set the interval handed to nodes on load-reporting streams.
    pub fn load_reporting_interval(mut self, interval: Duration) -> Self {
        self.config.load_reporting_interval = interval;
        self
    }

    /// Set the clusters nodes should report load for.
    pub fn load_report_clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.load_report_clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    /// Enable metrics collection.
    pub fn enable_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }

    /// Build the server.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Configuration`] if:
    /// - The response buffer size is zero
    /// - The load-reporting interval is zero
    /// - The terminate-on-canary policy is set without canary pushes
    pub fn build(self) -> XdsResult<XdsServer> {
        if self.config.response_buffer_size == 0 {
            return Err(XdsError::Configuration(
                "response buffer size must be non-zero".into(),
            ));
        }
        if self.config.load_reporting_interval.is_zero() {
            return Err(XdsError::Configuration(
                "load reporting interval must be non-zero".into(),
            ));
        }
        if self.config.terminate_on_canary_failure && !self.config.canary {
            return Err(XdsError::Configuration(
                "terminate on canary failure requires canary pushes".into(),
            ));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ResourceVersionStore::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ResourceRegistry::with_default_types()));

        Ok(XdsServer::new(
            store,
            registry,
            self.config,
            self.enable_metrics,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let server = XdsServerBuilder::new().build().unwrap();
        assert_eq!(server.config().load_reporting_interval, Duration::from_secs(10));
        assert_eq!(server.registry().len(), 4);
        assert!(server.metrics().is_none());
    }

    #[test]
    fn builder_rejects_zero_buffer() {
        let result = XdsServerBuilder::new().response_buffer_size(0).build();
        assert!(matches!(result, Err(XdsError::Configuration(_))));
    }

    #[test]
    fn builder_rejects_zero_interval() {
        let result = XdsServerBuilder::new()
            .load_reporting_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(XdsError::Configuration(_))));
    }

    #[test]
    fn builder_rejects_terminate_without_canary() {
        let result = XdsServerBuilder::new()
            .terminate_on_canary_failure(true)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_success() {
        let server = XdsServerBuilder::new()
            .canary(true)
            .terminate_on_canary_failure(true)
            .control_plane_id("meridian-1")
            .load_report_clusters(["backend", "frontend"])
            .enable_metrics()
            .build()
            .unwrap();

        assert!(server.config().canary);
        assert_eq!(server.config().control_plane_id.as_deref(), Some("meridian-1"));
        assert_eq!(server.config().load_report_clusters.len(), 2);
        assert!(server.metrics().is_some());
    }
}
