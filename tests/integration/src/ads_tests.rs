//! Aggregated discovery between the management plane and a data-plane client.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use integration_tests::{apply_bundle, bundle_store, open_ads, EDGE_BUNDLE};
use meridian_xds::dataplane::{ResourceBundle, ResponseDisposition};
use meridian_xds::prelude::*;
use meridian_xds::types::envoy::service::discovery::v3::DiscoveryRequest;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::StreamExt;

fn client(registry: ResourceRegistry) -> DiscoveryClient {
    DiscoveryClient::new(
        &Node::new("edge-1").with_cluster("edge"),
        Arc::new(ResourceVersionStore::new()),
        Arc::new(registry),
    )
}

#[tokio::test]
async fn first_request_is_answered_and_ack_is_quiet() {
    let store = bundle_store(EDGE_BUNDLE);
    let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
    let (tx, mut responses) = open_ads(&server).await;
    let client = client(ResourceRegistry::with_default_types());

    tx.send(client.initial_request(TypeUrl::LISTENER, vec![]))
        .await
        .unwrap();
    let push = responses.next().await.unwrap().unwrap();
    assert_eq!(push.type_url, TypeUrl::LISTENER);
    assert!(!push.version_info.is_empty());
    assert_eq!(push.resources.len(), 1);

    let disposition = client.handle_response(&push);
    assert!(disposition.is_ack());
    tx.send(disposition.into_request()).await.unwrap();

    let quiet = timeout(Duration::from_millis(200), responses.next()).await;
    assert!(quiet.is_err(), "an ACK must not trigger another push");

    let applied = client.store().snapshot(TypeUrl::LISTENER).unwrap();
    assert_eq!(applied.version().as_str(), push.version_info);
    assert!(applied.get("edge").is_some());
}

#[tokio::test]
async fn store_update_is_pushed_after_ack() {
    let store = bundle_store(EDGE_BUNDLE);
    let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
    let (tx, mut responses) = open_ads(&server).await;
    let client = client(ResourceRegistry::with_default_types());

    tx.send(client.initial_request(TypeUrl::CLUSTER, vec![]))
        .await
        .unwrap();
    let first = responses.next().await.unwrap().unwrap();
    tx.send(client.handle_response(&first).into_request())
        .await
        .unwrap();

    apply_bundle(
        &store,
        r#"{ "clusters": [{ "name": "backend", "connect_timeout_ms": 500 }] }"#,
    );

    let second = timeout(Duration::from_secs(2), responses.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_ne!(second.version_info, first.version_info);
    assert_ne!(second.nonce, first.nonce);
    assert_eq!(second.resources.len(), 1);

    assert!(client.handle_response(&second).is_ack());
    assert_eq!(client.store().snapshot(TypeUrl::CLUSTER).unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_push_is_not_resent_until_content_changes() {
    let store = bundle_store(EDGE_BUNDLE);
    let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
    let (tx, mut responses) = open_ads(&server).await;
    // No decoders: every push is rejected.
    let client = client(ResourceRegistry::new());

    tx.send(client.initial_request(TypeUrl::CLUSTER, vec![]))
        .await
        .unwrap();
    let push = responses.next().await.unwrap().unwrap();

    let disposition = client.handle_response(&push);
    let ResponseDisposition::Nack { request, .. } = &disposition else {
        panic!("expected a NACK, got {disposition:?}");
    };
    assert!(request.version_info.is_empty());
    assert_eq!(request.response_nonce, push.nonce);
    let detail = request.error_detail.as_ref().unwrap();
    assert_eq!(detail.code, 3);
    assert!(!detail.message.is_empty());
    tx.send(disposition.into_request()).await.unwrap();

    let quiet = timeout(Duration::from_millis(200), responses.next()).await;
    assert!(quiet.is_err(), "rejected content must not be pushed again");

    apply_bundle(&store, r#"{ "clusters": [{ "name": "replacement" }] }"#);
    let next = timeout(Duration::from_secs(2), responses.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_ne!(next.version_info, push.version_info);
}

#[tokio::test]
async fn client_run_converges_on_server_state() {
    let store = bundle_store(EDGE_BUNDLE);
    let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
    let (tx, responses) = open_ads(&server).await;
    let client = Arc::new(client(ResourceRegistry::with_default_types()));

    let (request_tx, mut request_rx) = mpsc::channel::<DiscoveryRequest>(16);
    let forward = tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            if tx.send(request).await.is_err() {
                break;
            }
        }
    });

    let runner = Arc::clone(&client);
    let run = tokio::spawn(async move {
        runner
            .run(
                vec![
                    (TypeUrl::new(TypeUrl::CLUSTER), vec![]),
                    (TypeUrl::new(TypeUrl::LISTENER), vec!["edge".to_string()]),
                ],
                responses,
                request_tx,
            )
            .await
    });

    let converged = async {
        loop {
            let local = client.store();
            if local.version(TypeUrl::CLUSTER) == store.version(TypeUrl::CLUSTER)
                && local.version(TypeUrl::LISTENER) == store.version(TypeUrl::LISTENER)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    timeout(Duration::from_secs(5), converged).await.unwrap();

    assert_eq!(client.store().snapshot(TypeUrl::CLUSTER).unwrap().len(), 2);
    run.abort();
    forward.abort();
}

#[tokio::test]
async fn reconnect_resumes_from_applied_version() {
    let store = bundle_store(EDGE_BUNDLE);
    let server = XdsServer::builder().store(Arc::clone(&store)).build().unwrap();
    let client = client(ResourceRegistry::with_default_types());

    {
        let (tx, mut responses) = open_ads(&server).await;
        tx.send(client.initial_request(TypeUrl::LISTENER, vec![]))
            .await
            .unwrap();
        let push = responses.next().await.unwrap().unwrap();
        tx.send(client.handle_response(&push).into_request())
            .await
            .unwrap();
    }

    let (tx, mut responses) = open_ads(&server).await;
    let resume = client.initial_request(TypeUrl::LISTENER, vec![]);
    assert_eq!(resume.version_info, store.version(TypeUrl::LISTENER).as_str());
    tx.send(resume).await.unwrap();

    let quiet = timeout(Duration::from_millis(200), responses.next()).await;
    assert!(quiet.is_err(), "a node resuming the current version needs no push");
}

fn apply_type(store: &ResourceVersionStore, type_url: &str, json: &str) {
    let bundle = ResourceBundle::from_json(json).unwrap();
    store
        .apply_versioned(type_url, bundle.resources(type_url).unwrap())
        .unwrap();
}

fn edge_listener(chain: &str) -> String {
    format!(
        r#"{{ "listeners": [{{
            "name": "edge",
            "address": {{ "address": "0.0.0.0", "port_value": 443 }},
            "filter_chains": [{{
                "name": "{chain}",
                "filters": [{{ "name": "envoy.filters.network.tcp_proxy" }}]
            }}]
        }}] }}"#
    )
}

#[tokio::test]
async fn every_changed_type_is_pushed_under_backpressure() {
    let store = bundle_store(EDGE_BUNDLE);
    let server = XdsServer::builder()
        .store(Arc::clone(&store))
        .response_buffer_size(1)
        .build()
        .unwrap();
    let (tx, mut responses) = open_ads(&server).await;
    let client = client(ResourceRegistry::with_default_types());

    for type_url in [TypeUrl::LISTENER, TypeUrl::CLUSTER] {
        tx.send(client.initial_request(type_url, vec![])).await.unwrap();
        let push = responses.next().await.unwrap().unwrap();
        tx.send(client.handle_response(&push).into_request())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    apply_type(&store, TypeUrl::LISTENER, &edge_listener("second"));
    apply_type(&store, TypeUrl::LISTENER, &edge_listener("third"));
    apply_type(
        &store,
        TypeUrl::CLUSTER,
        r#"{ "clusters": [{ "name": "replacement" }] }"#,
    );

    let wanted = HashMap::from([
        (TypeUrl::LISTENER.to_string(), store.version(TypeUrl::LISTENER).into_inner()),
        (TypeUrl::CLUSTER.to_string(), store.version(TypeUrl::CLUSTER).into_inner()),
    ]);
    let mut latest: HashMap<String, String> = HashMap::new();
    while latest != wanted {
        let push = timeout(Duration::from_secs(2), responses.next())
            .await
            .expect("every changed type is pushed")
            .unwrap()
            .unwrap();
        tx.send(client.handle_response(&push).into_request())
            .await
            .unwrap();
        latest.insert(push.type_url, push.version_info);
    }

    let clusters = client.store().snapshot(TypeUrl::CLUSTER).unwrap();
    assert!(clusters.get("replacement").is_some());
}
