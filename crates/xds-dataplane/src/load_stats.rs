//! Per-cluster load accounting.
//!
//! [`LoadStatsAggregator`] collects request outcomes from many connection
//! tasks and hands out delta reports. Each cluster carries a read/write
//! gate: increments hold the read side, a drain holds the write side while
//! it swaps every counter to zero. An increment therefore lands either
//! wholly before a drain or wholly after it, never in both or neither.
//!
//! Localities and clusters with nothing to report are forgotten at drain
//! time, so churned clusters do not accumulate. A cluster is retired under
//! its write gate; a recorder that finds its cluster retired looks it up
//! again and lands in the fresh entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;
use xds_core::Locality;
use xds_types::envoy::config::endpoint::v3::{
    ClusterStats, EndpointLoadMetricStats, UpstreamLocalityStats,
};

/// How a tracked request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Error,
}

#[derive(Debug, Default)]
struct LocalityLoad {
    issued: AtomicU64,
    successful: AtomicU64,
    errors: AtomicU64,
    in_progress: AtomicU64,
    metrics: Mutex<HashMap<String, (u64, f64)>>,
}

impl LocalityLoad {
    fn drain(&self, locality: &Locality) -> Option<UpstreamLocalityStats> {
        let issued = self.issued.swap(0, Ordering::Relaxed);
        let successful = self.successful.swap(0, Ordering::Relaxed);
        let errors = self.errors.swap(0, Ordering::Relaxed);
        let in_progress = self.in_progress.load(Ordering::Relaxed);
        let metrics = {
            let mut guard = self.metrics.lock().expect("load metrics lock poisoned");
            std::mem::take(&mut *guard)
        };

        let idle = issued == 0 && successful == 0 && errors == 0 && in_progress == 0;
        if idle && metrics.is_empty() {
            return None;
        }

        let mut load_metric_stats: Vec<EndpointLoadMetricStats> = metrics
            .into_iter()
            .map(|(metric_name, (count, total))| EndpointLoadMetricStats {
                metric_name,
                num_requests_finished_with_metric: count,
                total_metric_value: total,
            })
            .collect();
        load_metric_stats.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));

        Some(UpstreamLocalityStats {
            locality: Some(locality.into()),
            total_successful_requests: successful,
            total_requests_in_progress: in_progress,
            total_error_requests: errors,
            load_metric_stats,
            total_issued_requests: issued,
        })
    }
}

#[derive(Debug)]
struct ClusterLoad {
    gate: RwLock<()>,
    retired: AtomicBool,
    dropped: AtomicU64,
    localities: DashMap<Locality, Arc<LocalityLoad>>,
    last_drain: Mutex<Instant>,
}

impl ClusterLoad {
    fn new() -> Self {
        Self {
            gate: RwLock::new(()),
            retired: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            localities: DashMap::new(),
            last_drain: Mutex::new(Instant::now()),
        }
    }

    /// Counters of `locality`. The caller holds the read gate.
    fn locality(&self, locality: &Locality) -> Arc<LocalityLoad> {
        if let Some(load) = self.localities.get(locality) {
            return Arc::clone(&load);
        }
        Arc::clone(&self.localities.entry(locality.clone()).or_default())
    }

    /// Report and reset. The caller holds the write gate.
    ///
    /// Idle localities are removed. Returns `None` when the whole cluster
    /// was idle.
    fn drain(&self, cluster_name: &str, now: Instant) -> Option<ClusterStats> {
        let interval = {
            let mut last = self.last_drain.lock().expect("load drain lock poisoned");
            let interval = now.saturating_duration_since(*last);
            *last = now;
            interval
        };

        let mut upstream_locality_stats: Vec<(Locality, UpstreamLocalityStats)> = Vec::new();
        let mut idle: Vec<Locality> = Vec::new();
        for entry in self.localities.iter() {
            match entry.value().drain(entry.key()) {
                Some(stats) => upstream_locality_stats.push((entry.key().clone(), stats)),
                None => idle.push(entry.key().clone()),
            }
        }
        for locality in &idle {
            self.localities.remove(locality);
        }
        upstream_locality_stats.sort_by(|a, b| a.0.cmp(&b.0));

        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if upstream_locality_stats.is_empty() && dropped == 0 {
            return None;
        }

        Some(ClusterStats {
            cluster_name: cluster_name.to_string(),
            upstream_locality_stats: upstream_locality_stats
                .into_iter()
                .map(|(_, stats)| stats)
                .collect(),
            total_dropped_requests: dropped,
            load_report_interval: Some(to_proto_duration(interval)),
        })
    }
}

/// Accumulates per-cluster, per-locality load between reports.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct LoadStatsAggregator {
    clusters: DashMap<String, Arc<ClusterLoad>>,
}

impl LoadStatsAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    fn cluster(&self, name: &str) -> Arc<ClusterLoad> {
        if let Some(load) = self.clusters.get(name) {
            return Arc::clone(&load);
        }
        Arc::clone(
            &self
                .clusters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ClusterLoad::new())),
        )
    }

    /// Run `f` on a live cluster while holding its read gate.
    fn record<R>(&self, cluster: &str, f: impl FnOnce(&ClusterLoad) -> R) -> R {
        loop {
            let load = self.cluster(cluster);
            let _gate = load.gate.read().expect("load gate lock poisoned");
            if !load.retired.load(Ordering::Acquire) {
                return f(&load);
            }
        }
    }

    fn record_locality(&self, cluster: &str, locality: &Locality, f: impl FnOnce(&LocalityLoad)) {
        self.record(cluster, |load| f(&load.locality(locality)));
    }

    /// A request was issued to `locality` of `cluster`.
    ///
    /// Counts as issued and in progress until [`Self::end_request`].
    pub fn begin_request(&self, cluster: &str, locality: &Locality) {
        self.record_locality(cluster, locality, |load| {
            load.issued.fetch_add(1, Ordering::Relaxed);
            load.in_progress.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// A request started with [`Self::begin_request`] finished.
    pub fn end_request(&self, cluster: &str, locality: &Locality, outcome: RequestOutcome) {
        self.record_locality(cluster, locality, |load| {
            let _ = load
                .in_progress
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
            match outcome {
                RequestOutcome::Success => load.successful.fetch_add(1, Ordering::Relaxed),
                RequestOutcome::Error => load.errors.fetch_add(1, Ordering::Relaxed),
            };
        });
    }

    /// Count one successful request.
    pub fn add_success(&self, cluster: &str, locality: &Locality) {
        self.record_locality(cluster, locality, |load| {
            load.successful.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Count one failed request.
    pub fn add_error(&self, cluster: &str, locality: &Locality) {
        self.record_locality(cluster, locality, |load| {
            load.errors.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Count one request dropped before reaching an endpoint.
    pub fn add_drop(&self, cluster: &str) {
        self.record(cluster, |load| {
            load.dropped.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Add one observation of a named metric.
    pub fn record_metric(&self, cluster: &str, locality: &Locality, name: &str, value: f64) {
        self.record_locality(cluster, locality, |load| {
            let mut metrics = load.metrics.lock().expect("load metrics lock poisoned");
            let entry = metrics.entry(name.to_string()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += value;
        });
    }

    /// Names of clusters with load not yet found idle by a drain, sorted.
    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Report and reset every cluster. Idle clusters are forgotten and
    /// left out of the report.
    pub fn drain(&self) -> Vec<ClusterStats> {
        self.drain_where(|_| true)
    }

    /// Report and reset only the named clusters.
    ///
    /// Other clusters keep accumulating until they are drained.
    pub fn drain_clusters(&self, clusters: &[String]) -> Vec<ClusterStats> {
        self.drain_where(|name| clusters.iter().any(|c| c == name))
    }

    fn drain_where(&self, include: impl Fn(&str) -> bool) -> Vec<ClusterStats> {
        let now = Instant::now();
        let mut targets: Vec<(String, Arc<ClusterLoad>)> = self
            .clusters
            .iter()
            .filter(|e| include(e.key().as_str()))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));

        let mut retired = 0;
        let stats: Vec<ClusterStats> = targets
            .iter()
            .filter_map(|(name, load)| {
                let _gate = load.gate.write().expect("load gate lock poisoned");
                let stats = load.drain(name, now);
                if stats.is_none() {
                    load.retired.store(true, Ordering::Release);
                    self.clusters.remove_if(name, |_, current| Arc::ptr_eq(current, load));
                    retired += 1;
                }
                stats
            })
            .collect();
        trace!(clusters = stats.len(), retired, "drained load stats");
        stats
    }
}

pub(crate) fn to_proto_duration(d: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        nanos: i32::try_from(d.subsec_nanos()).unwrap_or(0),
    }
}
