//! Load Reporting Service (LRS) implementation.
//!
//! Nodes open one load-stats stream, identify themselves on the first
//! request and then report per-cluster load at the interval the server
//! hands back. Reports are forwarded to a bounded channel; what happens
//! to them next is up to the embedding application.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use xds_core::{Node, XdsError};
use xds_types::envoy::config::endpoint::v3::ClusterStats;
use xds_types::envoy::service::load_stats::v3::{LoadStatsRequest, LoadStatsResponse};

use crate::config::ServerConfig;
use crate::metrics::{StreamTracker, XdsMetrics};
use crate::stream::StreamContext;

/// Boxed inbound load-stats request stream.
pub type LoadStatsRequestStream =
    Pin<Box<dyn Stream<Item = Result<LoadStatsRequest, Status>> + Send + 'static>>;

/// Load reported by one node on one request.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Reporting node.
    pub node: Node,
    /// Per-cluster statistics.
    pub cluster_stats: Vec<ClusterStats>,
    /// When the report arrived.
    pub received_at: Instant,
}

/// Load Reporting Service.
#[derive(Debug, Clone)]
pub struct LrsService {
    config: Arc<ServerConfig>,
    sink: mpsc::Sender<LoadReport>,
    metrics: Option<XdsMetrics>,
}

impl LrsService {
    /// Create a service forwarding reports to `sink`.
    pub fn new(config: Arc<ServerConfig>, sink: mpsc::Sender<LoadReport>) -> Self {
        Self {
            config,
            sink,
            metrics: None,
        }
    }

    /// Attach metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: XdsMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Response telling a node what to report and how often.
    pub fn reporting_response(&self) -> LoadStatsResponse {
        LoadStatsResponse {
            clusters: self.config.load_report_clusters.clone(),
            load_reporting_interval: Some(to_proto_duration(self.config.load_reporting_interval)),
        }
    }
}

fn to_proto_duration(d: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        nanos: d.subsec_nanos() as i32,
    }
}

/// Trait for LRS service implementation.
#[async_trait]
pub trait LoadReportingService: Send + Sync + 'static {
    /// Server streaming response type.
    type StreamLoadStatsStream: Stream<Item = Result<LoadStatsResponse, Status>> + Send + 'static;

    /// Bidirectional load-stats stream.
    async fn stream_load_stats(
        &self,
        request: Request<LoadStatsRequestStream>,
    ) -> Result<Response<Self::StreamLoadStatsStream>, Status>;
}

#[async_trait]
impl LoadReportingService for LrsService {
    type StreamLoadStatsStream = ReceiverStream<Result<LoadStatsResponse, Status>>;

    #[instrument(skip(self, request), name = "lrs_stream")]
    async fn stream_load_stats(
        &self,
        request: Request<LoadStatsRequestStream>,
    ) -> Result<Response<Self::StreamLoadStatsStream>, Status> {
        let mut stream = request.into_inner();
        let (tx, rx) = mpsc::channel(self.config.response_buffer_size.max(1));
        let service = self.clone();

        tokio::spawn(async move {
            let mut ctx = StreamContext::new();
            let _tracker = service
                .metrics
                .clone()
                .map(|m| StreamTracker::new(m, "LRS"));
            info!(stream = %ctx.id(), "LRS stream started");

            while let Some(result) = stream.next().await {
                let request = match result {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(stream = %ctx.id(), error = %e, "stream error");
                        break;
                    }
                };
                ctx.record_request();

                if ctx.node().is_none() {
                    let node = request
                        .node
                        .clone()
                        .ok_or_else(|| {
                            XdsError::validation(
                                "",
                                "node",
                                "first request must include node information",
                            )
                        })
                        .and_then(Node::try_from);
                    match node {
                        Ok(node) => {
                            debug!(stream = %ctx.id(), node_id = %node.id, "node identified");
                            ctx.set_node(node);
                        }
                        Err(e) => {
                            warn!(stream = %ctx.id(), error = %e, "rejecting LRS stream");
                            let _ = tx.send(Err(e.into())).await;
                            break;
                        }
                    }

                    if tx.send(Ok(service.reporting_response())).await.is_err() {
                        break;
                    }
                    ctx.record_response();
                }

                if request.cluster_stats.is_empty() {
                    continue;
                }
                let Some(node) = ctx.node().cloned() else {
                    continue;
                };

                debug!(
                    stream = %ctx.id(),
                    node_id = %node.id,
                    clusters = request.cluster_stats.len(),
                    "load report received"
                );
                if let Some(metrics) = &service.metrics {
                    metrics.record_load_report(request.cluster_stats.len());
                }

                let report = LoadReport {
                    node,
                    cluster_stats: request.cluster_stats,
                    received_at: Instant::now(),
                };
                if service.sink.send(report).await.is_err() {
                    debug!(stream = %ctx.id(), "load report sink closed, discarding report");
                }
            }

            info!(
                stream = %ctx.id(),
                duration = ?ctx.duration(),
                requests = ctx.request_count(),
                "LRS stream ended"
            );
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use xds_types::envoy::config::core::v3::Node as WireNode;

    use super::*;

    fn node() -> Option<WireNode> {
        Some(WireNode {
            id: "node-1".into(),
            ..Default::default()
        })
    }

    fn stats(cluster: &str) -> ClusterStats {
        ClusterStats {
            cluster_name: cluster.into(),
            total_dropped_requests: 3,
            ..Default::default()
        }
    }

    async fn open(
        service: &LrsService,
    ) -> (
        mpsc::Sender<Result<LoadStatsRequest, Status>>,
        ReceiverStream<Result<LoadStatsResponse, Status>>,
    ) {
        let (tx, rx) = mpsc::channel(4);
        let requests: LoadStatsRequestStream = Box::pin(ReceiverStream::new(rx));
        let responses = service
            .stream_load_stats(Request::new(requests))
            .await
            .unwrap()
            .into_inner();
        (tx, responses)
    }

    #[tokio::test]
    async fn first_request_gets_interval_and_clusters() {
        let config = ServerConfig {
            load_reporting_interval: Duration::from_secs(5),
            load_report_clusters: vec!["backend".into()],
            ..Default::default()
        };
        let (sink, mut reports) = mpsc::channel(4);
        let service = LrsService::new(Arc::new(config), sink);
        let (tx, mut responses) = open(&service).await;

        tx.send(Ok(LoadStatsRequest {
            node: node(),
            cluster_stats: vec![],
        }))
        .await
        .unwrap();

        let response = responses.next().await.unwrap().unwrap();
        assert_eq!(response.clusters, vec!["backend".to_string()]);
        assert_eq!(response.load_reporting_interval.map(|d| d.seconds), Some(5));

        tx.send(Ok(LoadStatsRequest {
            node: None,
            cluster_stats: vec![stats("backend")],
        }))
        .await
        .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.node.id, "node-1");
        assert_eq!(report.cluster_stats[0].total_dropped_requests, 3);
    }

    #[tokio::test]
    async fn missing_node_ends_stream() {
        let (sink, _reports) = mpsc::channel(1);
        let service = LrsService::new(Arc::new(ServerConfig::default()), sink);
        let (tx, mut responses) = open(&service).await;

        tx.send(Ok(LoadStatsRequest {
            node: None,
            cluster_stats: vec![stats("backend")],
        }))
        .await
        .unwrap();

        let status = responses.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(responses.next().await.is_none());
    }

    #[test]
    fn default_interval_is_ten_seconds() {
        let (sink, _reports) = mpsc::channel(1);
        let service = LrsService::new(Arc::new(ServerConfig::default()), sink);
        let response = service.reporting_response();
        assert_eq!(response.load_reporting_interval.map(|d| d.seconds), Some(10));
        assert!(response.clusters.is_empty());
    }
}
