//! Metrics for the management plane.
//!
//! Emitted through the `metrics` facade; installing a recorder is up to
//! the embedding binary.
//!
//! - Request, push, ACK and NACK counters per type URL
//! - Protocol error counter
//! - Stream tracking
//! - Load report counter
//!
//! # Example
//!
//! ```rust
//! use xds_server::XdsMetrics;
//!
//! let metrics = XdsMetrics::new();
//! metrics.record_request("type.googleapis.com/envoy.config.cluster.v3.Cluster");
//! metrics.record_push("type.googleapis.com/envoy.config.cluster.v3.Cluster", 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metrics handle for the management plane. Cheap to clone.
#[derive(Debug, Clone)]
pub struct XdsMetrics {
    inner: Arc<XdsMetricsInner>,
}

#[derive(Debug)]
struct XdsMetricsInner {
    active_streams: AtomicU64,
}

impl Default for XdsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl XdsMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(XdsMetricsInner {
                active_streams: AtomicU64::new(0),
            }),
        }
    }

    /// Record an incoming request.
    pub fn record_request(&self, type_url: &str) {
        counter!("xds_requests_total", "type_url" => type_url.to_string()).increment(1);
    }

    /// Record a push and the number of resources it carried.
    pub fn record_push(&self, type_url: &str, resources: usize) {
        counter!("xds_pushes_total", "type_url" => type_url.to_string()).increment(1);
        histogram!("xds_push_resources", "type_url" => type_url.to_string())
            .record(resources as f64);
    }

    /// Record a NACK (negative acknowledgment).
    pub fn record_nack(&self, type_url: &str) {
        counter!("xds_nacks_total", "type_url" => type_url.to_string()).increment(1);
    }

    /// Record an ACK (acknowledgment).
    pub fn record_ack(&self, type_url: &str) {
        counter!("xds_acks_total", "type_url" => type_url.to_string()).increment(1);
    }

    /// Record an ignored malformed request.
    pub fn record_protocol_error(&self, type_url: &str) {
        counter!("xds_protocol_errors_total", "type_url" => type_url.to_string()).increment(1);
    }

    /// Record a load report received from a node.
    pub fn record_load_report(&self, clusters: usize) {
        counter!("xds_load_reports_total").increment(1);
        histogram!("xds_load_report_clusters").record(clusters as f64);
    }

    /// Record a stream opened.
    pub fn stream_opened(&self, service: &str) {
        let count = self.inner.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("xds_streams_opened_total", "service" => service.to_string()).increment(1);
        gauge!("xds_active_streams").set(count as f64);
    }

    /// Record a stream closed.
    pub fn stream_closed(&self, service: &str, duration: Duration) {
        let count = self
            .inner
            .active_streams
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        counter!("xds_streams_closed_total", "service" => service.to_string()).increment(1);
        gauge!("xds_active_streams").set(count as f64);
        histogram!("xds_stream_duration_seconds", "service" => service.to_string())
            .record(duration.as_secs_f64());
    }

    /// Get the current number of active streams.
    pub fn active_streams(&self) -> u64 {
        self.inner.active_streams.load(Ordering::Relaxed)
    }
}

/// Stream duration tracker.
///
/// Counts the stream as open until dropped.
#[derive(Debug)]
pub struct StreamTracker {
    start: Instant,
    service: &'static str,
    metrics: XdsMetrics,
}

impl StreamTracker {
    /// Create a new stream tracker.
    pub fn new(metrics: XdsMetrics, service: &'static str) -> Self {
        metrics.stream_opened(service);
        Self {
            start: Instant::now(),
            service,
            metrics,
        }
    }
}

impl Drop for StreamTracker {
    fn drop(&mut self) {
        self.metrics.stream_closed(self.service, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation() {
        let metrics = XdsMetrics::new();
        assert_eq!(metrics.active_streams(), 0);
    }

    #[test]
    fn stream_tracking() {
        let metrics = XdsMetrics::new();

        metrics.stream_opened("ads");
        assert_eq!(metrics.active_streams(), 1);

        metrics.stream_opened("lds");
        assert_eq!(metrics.active_streams(), 2);

        metrics.stream_closed("ads", Duration::from_secs(10));
        assert_eq!(metrics.active_streams(), 1);
    }

    #[test]
    fn tracker_closes_on_drop() {
        let metrics = XdsMetrics::new();
        {
            let _tracker = StreamTracker::new(metrics.clone(), "ads");
            assert_eq!(metrics.active_streams(), 1);
        }
        assert_eq!(metrics.active_streams(), 0);
    }
}
