//! Load report scheduling.
//!
//! [`LoadReporter`] drives the node side of a load-stats stream: it
//! identifies the node, follows the interval and clusters the management
//! plane asks for, and drains the aggregator on every tick.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tonic::Status;
use tracing::{debug, info, warn};
use xds_core::{Node, XdsError, XdsResult};
use xds_types::envoy::config::core::v3::Node as WireNode;
use xds_types::envoy::service::load_stats::v3::{LoadStatsRequest, LoadStatsResponse};

use crate::load_stats::LoadStatsAggregator;

/// Interval used until the management plane sets one, and whenever it
/// sends a missing or zero interval.
pub const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(10);

/// Node side of the load reporting exchange.
#[derive(Debug)]
pub struct LoadReporter {
    node: WireNode,
    aggregator: Arc<LoadStatsAggregator>,
    interval: Duration,
    clusters: Vec<String>,
}

impl LoadReporter {
    /// Create a reporter for `node` draining `aggregator`.
    pub fn new(node: &Node, aggregator: Arc<LoadStatsAggregator>) -> Self {
        Self {
            node: node.into(),
            aggregator,
            interval: DEFAULT_REPORTING_INTERVAL,
            clusters: Vec::new(),
        }
    }

    /// Current reporting interval.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Clusters of interest; empty means every cluster.
    #[inline]
    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }

    /// First request on a stream: identifies the node, carries no load.
    pub fn initial_request(&self) -> LoadStatsRequest {
        LoadStatsRequest {
            node: Some(self.node.clone()),
            cluster_stats: Vec::new(),
        }
    }

    /// Adopt the interval and clusters the management plane asked for.
    pub fn apply_response(&mut self, response: &LoadStatsResponse) {
        self.interval = response
            .load_reporting_interval
            .as_ref()
            .map(from_proto_duration)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_REPORTING_INTERVAL);
        self.clusters = response.clusters.clone();
        debug!(
            interval = ?self.interval,
            clusters = self.clusters.len(),
            "load reporting parameters updated"
        );
    }

    /// Drain the aggregator into a report.
    pub fn report(&self) -> LoadStatsRequest {
        let cluster_stats = if self.clusters.is_empty() {
            self.aggregator.drain()
        } else {
            self.aggregator.drain_clusters(&self.clusters)
        };
        LoadStatsRequest {
            node: None,
            cluster_stats,
        }
    }

    /// Run the exchange until either side closes.
    ///
    /// Sends the initial request, then a report on every tick. Ticking
    /// starts with the first response and restarts on every later one.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::StreamClosed`] when the response stream fails.
    pub async fn run<S>(
        mut self,
        mut responses: S,
        tx: mpsc::Sender<LoadStatsRequest>,
    ) -> XdsResult<()>
    where
        S: Stream<Item = Result<LoadStatsResponse, Status>> + Unpin,
    {
        if tx.send(self.initial_request()).await.is_err() {
            return Ok(());
        }
        info!(node_id = %self.node.id, "load reporting started");

        let mut ticker: Option<Interval> = None;
        loop {
            tokio::select! {
                response = responses.next() => match response {
                    Some(Ok(response)) => {
                        self.apply_response(&response);
                        let start = Instant::now() + self.interval;
                        let mut interval = time::interval_at(start, self.interval);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker = Some(interval);
                    }
                    Some(Err(status)) => {
                        warn!(error = %status, "load stats stream failed");
                        return Err(XdsError::StreamClosed {
                            reason: status.message().to_string(),
                        });
                    }
                    None => {
                        debug!("load stats stream closed by management plane");
                        return Ok(());
                    }
                },
                () = tick(&mut ticker) => {
                    let report = self.report();
                    counter!("dataplane_load_reports_total").increment(1);
                    if tx.send(report).await.is_err() {
                        debug!("load report channel closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

fn from_proto_duration(d: &prost_types::Duration) -> Duration {
    let seconds = u64::try_from(d.seconds).unwrap_or(0);
    let nanos = u32::try_from(d.nanos).unwrap_or(0);
    Duration::new(seconds, nanos)
}
