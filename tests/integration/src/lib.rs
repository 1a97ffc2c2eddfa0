//! Shared fixtures for the integration tests.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use meridian_xds::dataplane::ResourceBundle;
use meridian_xds::prelude::*;
use meridian_xds::server::services::{AggregatedDiscoveryService, DiscoveryResponseStream};
use meridian_xds::server::DiscoveryRequestStream;
use meridian_xds::types::envoy::service::discovery::v3::DiscoveryRequest;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::Request;

/// Edge listener with an SNI chain, a wildcard chain and a catch-all.
pub const EDGE_BUNDLE: &str = r#"{
    "listeners": [{
        "name": "edge",
        "address": { "address": "0.0.0.0", "port_value": 443 },
        "filter_chains": [
            {
                "name": "api",
                "filter_chain_match": { "server_names": ["api.example.com"] },
                "filters": [{ "name": "envoy.filters.network.http_connection_manager" }]
            },
            {
                "name": "wildcard",
                "filter_chain_match": { "server_names": ["*.example.com"] },
                "filters": [{ "name": "envoy.filters.network.tcp_proxy" }]
            },
            {
                "name": "internal",
                "filter_chain_match": {
                    "prefix_ranges": [{ "address_prefix": "10.0.0.0", "prefix_len": 8 }]
                },
                "filters": [{ "name": "envoy.filters.network.tcp_proxy" }]
            },
            {
                "name": "internal-db",
                "filter_chain_match": {
                    "prefix_ranges": [{ "address_prefix": "10.1.0.0", "prefix_len": 16 }],
                    "destination_port": 5432
                },
                "filters": [{ "name": "envoy.filters.network.tcp_proxy" }]
            }
        ]
    }],
    "clusters": [
        { "name": "backend", "connect_timeout_ms": 250 },
        { "name": "database", "connect_timeout_ms": 1000 }
    ]
}"#;

/// Store holding every resource of `json`.
pub fn bundle_store(json: &str) -> Arc<ResourceVersionStore> {
    let store = Arc::new(ResourceVersionStore::new());
    apply_bundle(&store, json);
    store
}

/// Apply every resource set of `json` to `store`.
pub fn apply_bundle(store: &ResourceVersionStore, json: &str) {
    let bundle = ResourceBundle::from_json(json).unwrap();
    for (type_url, resources) in bundle.all_resources().unwrap() {
        store.apply_versioned(type_url, resources).unwrap();
    }
}

/// Open an ADS stream on `server`; returns the request side and the responses.
pub async fn open_ads(
    server: &XdsServer,
) -> (mpsc::Sender<DiscoveryRequest>, DiscoveryResponseStream) {
    let (tx, rx) = mpsc::channel(16);
    let requests: DiscoveryRequestStream = Box::pin(ReceiverStream::new(rx).map(Ok));
    let responses = server
        .ads()
        .stream_aggregated_resources(Request::new(requests))
        .await
        .unwrap()
        .into_inner();
    (tx, responses)
}
