//! Load reporting between a data-plane reporter and the management plane.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use meridian_xds::dataplane::RequestOutcome;
use meridian_xds::prelude::*;
use meridian_xds::server::services::{LoadReport, LoadReportingService, LoadStatsRequestStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Request;

struct Harness {
    aggregator: Arc<LoadStatsAggregator>,
    reports: mpsc::Receiver<LoadReport>,
}

async fn start(clusters: &[&str]) -> Harness {
    let server = XdsServer::builder()
        .store(Arc::new(ResourceVersionStore::new()))
        .load_reporting_interval(Duration::from_millis(50))
        .load_report_clusters(clusters.iter().copied())
        .build()
        .unwrap();

    let (sink, reports) = mpsc::channel(64);
    let (request_tx, request_rx) = mpsc::channel(16);
    let requests: LoadStatsRequestStream = Box::pin(ReceiverStream::new(request_rx).map(Ok));
    let responses = server
        .lrs(sink)
        .stream_load_stats(Request::new(requests))
        .await
        .unwrap()
        .into_inner();

    let aggregator = Arc::new(LoadStatsAggregator::new());
    let node = Node::new("edge-1").with_cluster("edge");
    let reporter = LoadReporter::new(&node, Arc::clone(&aggregator));
    tokio::spawn(reporter.run(responses, request_tx));

    Harness {
        aggregator,
        reports,
    }
}

impl Harness {
    /// Sum successes of `cluster` across reports until `expected` is reached.
    async fn collect_successes(&mut self, cluster: &str, expected: u64) -> Vec<String> {
        let mut seen = Vec::new();
        let mut total = 0;
        while total < expected {
            let report = timeout(Duration::from_secs(5), self.reports.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(report.node.id, "edge-1");
            for stats in &report.cluster_stats {
                seen.push(stats.cluster_name.clone());
                if stats.cluster_name == cluster {
                    total += stats
                        .upstream_locality_stats
                        .iter()
                        .map(|l| l.total_successful_requests)
                        .sum::<u64>();
                }
            }
        }
        assert_eq!(total, expected, "each request is reported exactly once");
        seen
    }
}

#[tokio::test]
async fn reports_reach_the_management_plane() {
    let mut harness = start(&[]).await;
    let locality = Locality::new("eu-west1", "b", "");

    for _ in 0..3 {
        harness.aggregator.begin_request("backend", &locality);
        harness
            .aggregator
            .end_request("backend", &locality, RequestOutcome::Success);
    }
    harness.aggregator.add_error("backend", &locality);

    let seen = harness.collect_successes("backend", 3).await;
    assert!(seen.iter().all(|c| c == "backend"));

    harness.aggregator.add_success("backend", &locality);
    harness.collect_successes("backend", 1).await;
}

#[tokio::test]
async fn only_requested_clusters_are_reported() {
    let mut harness = start(&["frontend"]).await;
    let locality = Locality::new("eu-west1", "b", "");

    harness.aggregator.add_success("backend", &locality);
    harness.aggregator.add_success("frontend", &locality);
    harness.aggregator.add_success("frontend", &locality);

    let seen = harness.collect_successes("frontend", 2).await;
    assert!(!seen.iter().any(|c| c == "backend"));

    // Unreported clusters keep accumulating.
    let retained = harness.aggregator.drain_clusters(&["backend".to_string()]);
    assert_eq!(
        retained[0].upstream_locality_stats[0].total_successful_requests,
        1
    );
}
