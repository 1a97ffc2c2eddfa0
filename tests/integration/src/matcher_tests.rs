//! Filter chain selection against listeners delivered through the store.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;

use integration_tests::{apply_bundle, bundle_store, EDGE_BUNDLE};
use meridian_xds::prelude::*;

fn conn(source: &str, destination: &str) -> ConnectionMetadata {
    let source: SocketAddr = source.parse().unwrap();
    let destination: SocketAddr = destination.parse().unwrap();
    ConnectionMetadata::new(source, destination)
}

fn selected(router: &ConnectionRouter, conn: &ConnectionMetadata) -> Option<String> {
    router
        .select("edge", conn)
        .selected()
        .map(|s| s.chain.name.clone())
}

#[test]
fn most_specific_chain_wins() {
    let router = ConnectionRouter::new(bundle_store(EDGE_BUNDLE));

    let exact = conn("192.0.2.1:50000", "10.1.2.3:443").with_server_name("API.example.com");
    assert_eq!(selected(&router, &exact).as_deref(), Some("api"));

    let wildcard = conn("192.0.2.1:50000", "10.1.2.3:443").with_server_name("www.example.com");
    assert_eq!(selected(&router, &wildcard).as_deref(), Some("wildcard"));

    let longer_prefix = conn("192.0.2.1:50000", "10.1.2.3:5432");
    assert_eq!(selected(&router, &longer_prefix).as_deref(), Some("internal-db"));

    let shorter_prefix = conn("192.0.2.1:50000", "10.2.0.1:5432");
    assert_eq!(selected(&router, &shorter_prefix).as_deref(), Some("internal"));
}

#[test]
fn unmatched_connections_are_reported() {
    let router = ConnectionRouter::new(bundle_store(EDGE_BUNDLE));

    let outside = conn("192.0.2.1:50000", "172.16.0.1:443");
    assert_eq!(router.select("edge", &outside), ChainSelection::NoMatch);

    let foreign_sni = conn("192.0.2.1:50000", "10.1.2.3:443").with_server_name("example.org");
    assert_eq!(router.select("edge", &foreign_sni), ChainSelection::NoMatch);

    assert_eq!(
        router.select("missing", &outside),
        ChainSelection::UnknownListener
    );
}

#[test]
fn selection_follows_listener_updates() {
    let store = bundle_store(EDGE_BUNDLE);
    let router = ConnectionRouter::new(Arc::clone(&store));
    let plain = conn("192.0.2.1:50000", "172.16.0.1:443");
    assert_eq!(router.select("edge", &plain), ChainSelection::NoMatch);
    let before = store.version(TypeUrl::LISTENER);

    apply_bundle(
        &store,
        r#"{
            "listeners": [{
                "name": "edge",
                "address": { "address": "0.0.0.0", "port_value": 443 },
                "filter_chains": [
                    { "name": "catch-all", "filters": [{ "name": "envoy.filters.network.tcp_proxy" }] },
                    { "name": "drain", "filter_chain_match": { "destination_port": 9901 } }
                ]
            }]
        }"#,
    );

    let selection = router.select("edge", &plain);
    let chosen = selection.selected().unwrap();
    assert_eq!(chosen.chain.name, "catch-all");
    assert_ne!(chosen.version, before);

    let admin = conn("192.0.2.1:50000", "172.16.0.1:9901");
    assert_eq!(router.select("edge", &admin), ChainSelection::EmptyFilterChain);
}

#[test]
fn matcher_works_on_a_listener_directly() {
    let store = bundle_store(EDGE_BUNDLE);
    let snapshot = store.snapshot(TypeUrl::LISTENER).unwrap();
    let listener = snapshot.get("edge").unwrap().as_listener().unwrap();
    let matcher = FilterChainMatcher::new(listener);

    let sni = conn("192.0.2.1:50000", "10.1.2.3:443").with_server_name("api.example.com");
    assert_eq!(matcher.select(&sni).unwrap().name, "api");
    assert_eq!(matcher.select_index(&sni), Some(0));
}
