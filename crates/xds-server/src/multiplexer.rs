//! Stream multiplexing across discovery sessions.
//!
//! A [`DiscoveryMultiplexer`] owns one bidirectional stream. Inbound
//! requests are dispatched to a [`DiscoverySession`] per type URL, created
//! on first sight. Store updates for every followed type are collected in
//! one [`PendingUpdates`] set and turned into pushes by the session they
//! belong to. Pushes of one type URL leave in order; pushes of different
//! types interleave freely.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tonic::Status;
use tracing::{debug, info, trace, warn};
use xds_cache::{PendingUpdates, ResourceVersionStore, WatchId};
use xds_core::{Node, ResourceRegistry, TypeUrl, XdsError};
use xds_types::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};

use crate::config::ServerConfig;
use crate::metrics::{StreamTracker, XdsMetrics};
use crate::session::{DiscoverySession, RequestKind};
use crate::stream::StreamContext;

/// Boxed inbound request stream accepted by the discovery services.
pub type DiscoveryRequestStream =
    Pin<Box<dyn Stream<Item = Result<DiscoveryRequest, Status>> + Send + 'static>>;

/// Which type URLs a stream serves.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// The single type URL served, or `None` for aggregated streams.
    pub type_url: Option<&'static str>,
    /// Service name for logging.
    pub service_name: &'static str,
}

impl StreamConfig {
    /// Configuration for a stream restricted to one type URL.
    pub const fn single(type_url: &'static str, service_name: &'static str) -> Self {
        Self {
            type_url: Some(type_url),
            service_name,
        }
    }

    /// Configuration for a stream carrying every type URL.
    pub const fn aggregated(service_name: &'static str) -> Self {
        Self {
            type_url: None,
            service_name,
        }
    }

    /// Resolve the type URL of a request.
    ///
    /// An empty type URL means the stream's own type. Returns `None` when
    /// the request cannot be served on this stream.
    pub fn resolve(&self, requested: &str) -> Option<TypeUrl> {
        match (self.type_url, requested.is_empty()) {
            (Some(own), true) => Some(TypeUrl::new(own)),
            (Some(own), false) if own == requested => Some(TypeUrl::new(own)),
            (Some(_), false) => None,
            (None, true) => None,
            (None, false) => Some(TypeUrl::new(requested)),
        }
    }
}

/// Stream configurations for each discovery service.
pub mod configs {
    use super::*;

    /// Aggregated Discovery Service.
    pub const ADS: StreamConfig = StreamConfig::aggregated("ADS");
    /// Cluster Discovery Service.
    pub const CDS: StreamConfig = StreamConfig::single(TypeUrl::CLUSTER, "CDS");
    /// Endpoint Discovery Service.
    pub const EDS: StreamConfig = StreamConfig::single(TypeUrl::ENDPOINT, "EDS");
    /// Listener Discovery Service.
    pub const LDS: StreamConfig = StreamConfig::single(TypeUrl::LISTENER, "LDS");
    /// Route Discovery Service.
    pub const RDS: StreamConfig = StreamConfig::single(TypeUrl::ROUTE, "RDS");
}

#[derive(Debug)]
struct SessionEntry {
    session: DiscoverySession,
    watch: WatchId,
}

/// Fans one discovery stream out into per-type sessions.
#[derive(Debug)]
pub struct DiscoveryMultiplexer {
    ctx: StreamContext,
    stream_config: StreamConfig,
    store: Arc<ResourceVersionStore>,
    registry: Arc<ResourceRegistry>,
    config: Arc<ServerConfig>,
    metrics: Option<XdsMetrics>,
    sessions: HashMap<TypeUrl, SessionEntry>,
    pending: Arc<PendingUpdates>,
}

impl DiscoveryMultiplexer {
    /// Create a multiplexer for a new stream.
    pub fn new(
        store: Arc<ResourceVersionStore>,
        registry: Arc<ResourceRegistry>,
        config: Arc<ServerConfig>,
        stream_config: StreamConfig,
    ) -> Self {
        Self {
            ctx: StreamContext::new(),
            stream_config,
            store,
            registry,
            config,
            metrics: None,
            sessions: HashMap::new(),
            pending: Arc::new(PendingUpdates::new()),
        }
    }

    /// Attach metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: XdsMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the stream context.
    #[inline]
    pub fn context(&self) -> &StreamContext {
        &self.ctx
    }

    /// Get the session for a type URL, if one was created.
    pub fn session(&self, type_url: &str) -> Option<&DiscoverySession> {
        self.sessions.get(type_url).map(|e| &e.session)
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handle one inbound request.
    ///
    /// Returns the push it triggers, if any. Malformed requests are logged
    /// and ignored.
    ///
    /// # Errors
    ///
    /// Returns a status that must end the stream when the first request
    /// carries no valid node or a session escalates a fatal event.
    pub fn handle_request(
        &mut self,
        request: DiscoveryRequest,
    ) -> Result<Option<DiscoveryResponse>, Status> {
        self.ctx.record_request();

        if self.ctx.node().is_none() {
            let Some(wire_node) = request.node.clone() else {
                warn!(
                    stream = %self.ctx.id(),
                    service = self.stream_config.service_name,
                    "first request missing required node information"
                );
                return Err(Status::invalid_argument(
                    "first request must include node information",
                ));
            };
            let node = Node::try_from(wire_node)?;
            debug!(stream = %self.ctx.id(), node_id = %node.id, "node identified");
            self.ctx.set_node(node);
        }

        let Some(type_url) = self.stream_config.resolve(&request.type_url) else {
            warn!(
                stream = %self.ctx.id(),
                service = self.stream_config.service_name,
                type_url = %request.type_url,
                "type URL not served on this stream"
            );
            return Ok(None);
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(type_url.as_str());
        }

        if !self.registry.contains(type_url.as_str()) {
            let err = XdsError::Protocol {
                type_url: type_url.to_string(),
                reason: "unknown resource type".to_string(),
            };
            self.protocol_error(&err);
            return Ok(None);
        }

        let entry = self.sessions.entry(type_url.clone()).or_insert_with(|| {
            let mut session = DiscoverySession::new(type_url.clone(), self.config.session_policy());
            session.start();
            let watch = self
                .store
                .watches()
                .subscribe(type_url.clone(), &self.pending);
            SessionEntry { session, watch }
        });

        match entry.session.on_request(&request) {
            Ok(kind) => self.log_request(&type_url, &request, kind),
            Err(err) if err.is_fatal() => {
                warn!(stream = %self.ctx.id(), error = %err, "ending stream");
                return Err(err.into());
            }
            Err(err) => {
                self.protocol_error(&err);
                return Ok(None);
            }
        }

        Ok(self.push(&type_url))
    }

    /// Handle a store update for `type_url`.
    ///
    /// Reads the latest snapshot from the store, so one call covers any
    /// number of changes since the last push.
    pub fn handle_update(&mut self, type_url: &TypeUrl) -> Option<DiscoveryResponse> {
        trace!(stream = %self.ctx.id(), type_url = %type_url, "store updated");
        self.push(type_url)
    }

    fn push(&mut self, type_url: &TypeUrl) -> Option<DiscoveryResponse> {
        let entry = self.sessions.get_mut(type_url)?;
        let push = entry.session.push_if_needed(&self.store)?;

        info!(
            stream = %self.ctx.id(),
            type_url = %type_url,
            version = %push.version,
            nonce = %push.nonce,
            count = push.resources.len(),
            canary = push.canary,
            "pushing resources"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_push(type_url.as_str(), push.resources.len());
        }
        self.ctx.record_response();

        Some(push.into_response(self.config.control_plane_id.as_deref()))
    }

    fn log_request(&self, type_url: &TypeUrl, request: &DiscoveryRequest, kind: RequestKind) {
        match kind {
            RequestKind::Initial => {
                debug!(stream = %self.ctx.id(), type_url = %type_url, "initial request");
            }
            RequestKind::Resume { version } => {
                debug!(
                    stream = %self.ctx.id(),
                    type_url = %type_url,
                    version = %version,
                    "resumed subscription"
                );
            }
            RequestKind::Ack { version } => {
                debug!(
                    stream = %self.ctx.id(),
                    type_url = %type_url,
                    version = %version,
                    "received ACK"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_ack(type_url.as_str());
                }
            }
            RequestKind::Nack { version, message } => {
                let err = XdsError::NackReceived {
                    node_id: self.ctx.node().map(|n| n.id.clone()).unwrap_or_default(),
                    type_url: type_url.to_string(),
                    nonce: request.response_nonce.clone(),
                    error_message: message,
                };
                warn!(
                    stream = %self.ctx.id(),
                    version = %version,
                    error = %err,
                    "push rejected"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_nack(type_url.as_str());
                }
            }
            RequestKind::Update => {
                trace!(stream = %self.ctx.id(), type_url = %type_url, "subscription request");
            }
            RequestKind::Stale { nonce } => {
                trace!(
                    stream = %self.ctx.id(),
                    type_url = %type_url,
                    nonce = %nonce,
                    "stale request"
                );
            }
        }
    }

    fn protocol_error(&self, err: &XdsError) {
        warn!(stream = %self.ctx.id(), error = %err, "ignoring malformed request");
        if let (Some(metrics), XdsError::Protocol { type_url, .. }) = (&self.metrics, err) {
            metrics.record_protocol_error(type_url);
        }
    }

    /// Close every session and cancel its store subscription.
    pub fn close(&mut self) {
        for (_, mut entry) in self.sessions.drain() {
            self.store.watches().cancel(entry.watch);
            entry.session.close();
        }
    }

    /// Drive the stream until either side ends it.
    ///
    /// Responses, and a terminal status if any, are written to `tx`.
    pub async fn run<S>(
        mut self,
        mut requests: S,
        tx: mpsc::Sender<Result<DiscoveryResponse, Status>>,
    ) where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Unpin,
    {
        let _tracker = self
            .metrics
            .clone()
            .map(|m| StreamTracker::new(m, self.stream_config.service_name));

        info!(
            stream = %self.ctx.id(),
            service = self.stream_config.service_name,
            "{} stream started",
            self.stream_config.service_name
        );

        let pending = Arc::clone(&self.pending);
        loop {
            let outcome: Result<Vec<DiscoveryResponse>, Status> = tokio::select! {
                next = requests.next() => match next {
                    Some(Ok(request)) => self.handle_request(request).map(Vec::from_iter),
                    Some(Err(status)) => {
                        warn!(stream = %self.ctx.id(), error = %status, "stream error");
                        break;
                    }
                    None => {
                        debug!(stream = %self.ctx.id(), "client closed stream");
                        break;
                    }
                },
                changed = pending.changed() => {
                    Ok(changed.iter().filter_map(|t| self.handle_update(t)).collect())
                }
            };

            match outcome {
                Ok(responses) => {
                    let mut disconnected = false;
                    for response in responses {
                        if tx.send(Ok(response)).await.is_err() {
                            disconnected = true;
                            break;
                        }
                    }
                    if disconnected {
                        debug!(stream = %self.ctx.id(), "client disconnected");
                        break;
                    }
                }
                Err(status) => {
                    let _ = tx.send(Err(status)).await;
                    break;
                }
            }
        }

        self.close();
        info!(
            stream = %self.ctx.id(),
            duration = ?self.ctx.duration(),
            requests = self.ctx.request_count(),
            responses = self.ctx.response_count(),
            "{} stream ended",
            self.stream_config.service_name
        );
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio_stream::wrappers::ReceiverStream;
    use xds_core::{Cluster, Filter, FilterChain, FilterChainMatch, Listener, Resource};
    use xds_types::envoy::config::core::v3::Node as WireNode;

    use super::*;

    fn listener(name: &str) -> Resource {
        Resource::Listener(Listener {
            name: name.into(),
            address: SocketAddr::from(([0, 0, 0, 0], 8080)),
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
        })
    }

    fn cluster(name: &str) -> Resource {
        Resource::Cluster(Cluster {
            name: name.into(),
            eds_service_name: None,
            connect_timeout: Duration::from_secs(1),
        })
    }

    fn request(type_url: &str, version: &str, nonce: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: version.into(),
            node: Some(WireNode {
                id: "node-1".into(),
                ..Default::default()
            }),
            type_url: type_url.into(),
            response_nonce: nonce.into(),
            ..Default::default()
        }
    }

    fn setup(stream_config: StreamConfig) -> (Arc<ResourceVersionStore>, DiscoveryMultiplexer) {
        let store = Arc::new(ResourceVersionStore::new());
        let mux = DiscoveryMultiplexer::new(
            Arc::clone(&store),
            Arc::new(ResourceRegistry::with_default_types()),
            Arc::new(ServerConfig::default()),
            stream_config,
        );
        (store, mux)
    }

    #[test]
    fn stream_config_resolution() {
        assert_eq!(
            configs::LDS.resolve("").map(|t| t.to_string()).as_deref(),
            Some(TypeUrl::LISTENER)
        );
        assert!(configs::LDS.resolve(TypeUrl::CLUSTER).is_none());
        assert!(configs::ADS.resolve("").is_none());
        assert_eq!(
            configs::ADS.resolve(TypeUrl::CLUSTER).map(|t| t.to_string()).as_deref(),
            Some(TypeUrl::CLUSTER)
        );
    }

    #[test]
    fn first_request_requires_node() {
        let (_store, mut mux) = setup(configs::ADS);
        let mut req = request(TypeUrl::LISTENER, "", "");
        req.node = None;

        let status = mux.handle_request(req).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn sessions_created_lazily_per_type() {
        let (store, mut mux) = setup(configs::ADS);
        store.apply(TypeUrl::LISTENER, "l1", vec![listener("a")]).unwrap();
        store.apply(TypeUrl::CLUSTER, "c1", vec![cluster("c")]).unwrap();

        let lds = mux.handle_request(request(TypeUrl::LISTENER, "", "")).unwrap().unwrap();
        assert_eq!(lds.version_info, "l1");
        assert_eq!(mux.session_count(), 1);

        let cds = mux.handle_request(request(TypeUrl::CLUSTER, "", "")).unwrap().unwrap();
        assert_eq!(cds.version_info, "c1");
        assert_eq!(mux.session_count(), 2);
        assert_eq!(store.watches().total_watch_count(), 2);
    }

    #[test]
    fn unknown_type_is_ignored() {
        let (_store, mut mux) = setup(configs::ADS);
        let result = mux
            .handle_request(request("type.googleapis.com/unknown.Type", "", ""))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(mux.session_count(), 0);
    }

    #[test]
    fn single_type_stream_skips_foreign_types() {
        let (store, mut mux) = setup(configs::LDS);
        store.apply(TypeUrl::CLUSTER, "c1", vec![cluster("c")]).unwrap();
        store.apply(TypeUrl::LISTENER, "l1", vec![listener("a")]).unwrap();

        assert!(mux.handle_request(request(TypeUrl::CLUSTER, "", "")).unwrap().is_none());

        let response = mux.handle_request(request("", "", "")).unwrap().unwrap();
        assert_eq!(response.type_url, TypeUrl::LISTENER);
    }

    #[test]
    fn ack_with_no_change_yields_no_push() {
        let (store, mut mux) = setup(configs::ADS);
        store.apply(TypeUrl::LISTENER, "v1", vec![listener("a")]).unwrap();

        let response = mux.handle_request(request(TypeUrl::LISTENER, "", "")).unwrap().unwrap();
        let ack = request(TypeUrl::LISTENER, &response.version_info, &response.nonce);
        assert!(mux.handle_request(ack).unwrap().is_none());
    }

    #[test]
    fn update_after_ack_pushes() {
        let (store, mut mux) = setup(configs::ADS);
        store.apply(TypeUrl::LISTENER, "v1", vec![listener("a")]).unwrap();
        let response = mux.handle_request(request(TypeUrl::LISTENER, "", "")).unwrap().unwrap();
        mux.handle_request(request(TypeUrl::LISTENER, "v1", &response.nonce))
            .unwrap();

        store.apply(TypeUrl::LISTENER, "v2", vec![listener("b")]).unwrap();
        let pushed = mux.handle_update(&TypeUrl::new(TypeUrl::LISTENER)).unwrap();
        assert_eq!(pushed.version_info, "v2");
    }

    #[test]
    fn close_cancels_watches() {
        let (store, mut mux) = setup(configs::ADS);
        mux.handle_request(request(TypeUrl::LISTENER, "", "")).unwrap();
        assert_eq!(store.watches().total_watch_count(), 1);

        mux.close();
        assert_eq!(mux.session_count(), 0);
        assert_eq!(store.watches().total_watch_count(), 0);
    }

    #[tokio::test]
    async fn run_pushes_store_updates() {
        let (store, mux) = setup(configs::ADS);
        store.apply(TypeUrl::LISTENER, "v1", vec![listener("a")]).unwrap();

        let (req_tx, req_rx) = mpsc::channel(4);
        let (resp_tx, mut resp_rx) = mpsc::channel(4);
        let handle = tokio::spawn(mux.run(ReceiverStream::new(req_rx), resp_tx));

        req_tx.send(Ok(request(TypeUrl::LISTENER, "", ""))).await.unwrap();
        let first = resp_rx.recv().await.unwrap().unwrap();
        assert_eq!(first.version_info, "v1");

        req_tx
            .send(Ok(request(TypeUrl::LISTENER, "v1", &first.nonce)))
            .await
            .unwrap();
        // Let the ACK land before the next apply.
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.apply(TypeUrl::LISTENER, "v2", vec![listener("b")]).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), resp_rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.version_info, "v2");

        drop(req_tx);
        handle.await.unwrap();
        assert_eq!(store.watches().total_watch_count(), 0);
    }

    #[tokio::test]
    async fn updates_of_every_type_survive_backpressure() {
        let (store, mux) = setup(configs::ADS);
        store.apply(TypeUrl::LISTENER, "l1", vec![listener("a")]).unwrap();
        store.apply(TypeUrl::CLUSTER, "c1", vec![cluster("c")]).unwrap();

        let (req_tx, req_rx) = mpsc::channel(4);
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        let handle = tokio::spawn(mux.run(ReceiverStream::new(req_rx), resp_tx));

        for type_url in [TypeUrl::LISTENER, TypeUrl::CLUSTER] {
            req_tx.send(Ok(request(type_url, "", ""))).await.unwrap();
            let response = resp_rx.recv().await.unwrap().unwrap();
            req_tx
                .send(Ok(request(type_url, &response.version_info, &response.nonce)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Two listener changes land before the cluster change.
        store.apply(TypeUrl::LISTENER, "l2", vec![listener("b")]).unwrap();
        store.apply(TypeUrl::LISTENER, "l3", vec![listener("c")]).unwrap();
        store.apply(TypeUrl::CLUSTER, "c2", vec![cluster("d")]).unwrap();

        let mut latest: HashMap<String, String> = HashMap::new();
        while latest.get(TypeUrl::LISTENER).map(String::as_str) != Some("l3")
            || latest.get(TypeUrl::CLUSTER).map(String::as_str) != Some("c2")
        {
            let response = tokio::time::timeout(Duration::from_secs(1), resp_rx.recv())
                .await
                .expect("every changed type is pushed")
                .unwrap()
                .unwrap();
            req_tx
                .send(Ok(request(
                    &response.type_url,
                    &response.version_info,
                    &response.nonce,
                )))
                .await
                .unwrap();
            latest.insert(response.type_url, response.version_info);
        }

        drop(req_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_ends_with_status_without_node() {
        let (_store, mux) = setup(configs::ADS);
        let (req_tx, req_rx) = mpsc::channel(1);
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        let handle = tokio::spawn(mux.run(ReceiverStream::new(req_rx), resp_tx));

        let mut req = request(TypeUrl::LISTENER, "", "");
        req.node = None;
        req_tx.send(Ok(req)).await.unwrap();

        let status = resp_rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        handle.await.unwrap();
    }
}
