//! Resource version store under concurrent use.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use meridian_xds::prelude::*;

fn clusters(count: usize) -> Vec<Resource> {
    (0..count)
        .map(|i| {
            Resource::Cluster(Cluster {
                name: format!("cluster-{i}"),
                eds_service_name: None,
                connect_timeout: Duration::from_millis(250),
            })
        })
        .collect()
}

#[test]
fn readers_never_observe_a_torn_snapshot() {
    let store = Arc::new(ResourceVersionStore::new());
    store.apply(TypeUrl::CLUSTER, "1", clusters(1)).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0;
                while !done.load(Ordering::Relaxed) {
                    let snapshot = store.snapshot(TypeUrl::CLUSTER).unwrap();
                    let expected: usize = snapshot.version().as_str().parse().unwrap();
                    assert_eq!(snapshot.len(), expected);
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for n in 2..=200 {
        let outcome = store
            .apply(TypeUrl::CLUSTER, n.to_string(), clusters(n))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }
    done.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(store.version(TypeUrl::CLUSTER).as_str(), "200");
}

#[test]
fn concurrent_writers_of_distinct_types_do_not_interfere() {
    let store = Arc::new(ResourceVersionStore::new());
    let writers: Vec<_> = [TypeUrl::CLUSTER, TypeUrl::ENDPOINT, TypeUrl::ROUTE]
        .into_iter()
        .map(|type_url| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 1..=50 {
                    store.apply(type_url, format!("v{n}"), vec![]).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(store.type_urls().len(), 3);
    for type_url in [TypeUrl::CLUSTER, TypeUrl::ENDPOINT, TypeUrl::ROUTE] {
        assert_eq!(store.version(type_url).as_str(), "v50");
    }
    assert_eq!(store.stats().applied(), 150);
}

#[test]
fn rejected_apply_keeps_previous_set() {
    let store = ResourceVersionStore::new();
    store.apply(TypeUrl::CLUSTER, "v1", clusters(2)).unwrap();

    let mut duplicated = clusters(2);
    duplicated.extend(clusters(1));
    assert!(store.apply(TypeUrl::CLUSTER, "v2", duplicated).is_err());
    assert!(store.apply(TypeUrl::CLUSTER, "v1", clusters(3)).is_err());
    assert!(store.apply(TypeUrl::CLUSTER, "", clusters(1)).is_err());

    let snapshot = store.snapshot(TypeUrl::CLUSTER).unwrap();
    assert_eq!(snapshot.version().as_str(), "v1");
    assert_eq!(snapshot.len(), 2);
    assert_eq!(store.stats().rejected(), 3);

    assert_eq!(
        store.apply(TypeUrl::CLUSTER, "v1", clusters(2)).unwrap(),
        ApplyOutcome::Unchanged
    );
}

#[tokio::test]
async fn watch_sees_the_latest_applied_set() {
    let store = ResourceVersionStore::new();
    let mut watch = store
        .watches()
        .create_watch(TypeUrl::new(TypeUrl::CLUSTER));

    store.apply(TypeUrl::CLUSTER, "v1", clusters(1)).unwrap();
    store.apply(TypeUrl::CLUSTER, "v1", clusters(1)).unwrap();
    store.apply(TypeUrl::ROUTE, "r1", vec![]).unwrap();

    let update = tokio::time::timeout(Duration::from_secs(1), watch.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.version().as_str(), "v1");
    assert!(watch.try_recv().is_err(), "unchanged and unrelated applies notify nothing");
}
