//! End-to-end tests for optimized routing against an in-process cluster.
//!
//! Two nodes share bucket `orders` with four vbuckets: A1 owns {0, 1} and
//! A2 owns {2, 3}. Tests drive resolution explicitly through
//! `RoutingClient::resolve` and a long background interval.

mod common;

use common::{eventually, init_tracing, FakeCluster, FakeDialer, FakeNameResolver, FakeNode};
use shardgate::{
    Address, ConnectionState, DialOptions, ResolverPhase, RoutingClient, RoutingConfig,
    RoutingError,
};
use shardgate_core::vbucket_for_key;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const A1: &str = "10.0.0.1:18098";
const A2: &str = "10.0.0.2:18098";

struct Harness {
    cluster: Arc<FakeCluster>,
    dialer: Arc<FakeDialer>,
    names: Arc<FakeNameResolver>,
    a1: Arc<FakeNode>,
    a2: Arc<FakeNode>,
}

fn orders_cluster() -> Harness {
    init_tracing();
    let cluster = FakeCluster::new();

    let a1 = cluster.add_node(A1);
    a1.set_buckets(&["orders"]);
    a1.set_routing("orders", 4, vec![0, 1]);

    let a2 = cluster.add_node(A2);
    a2.set_buckets(&["orders"]);
    a2.set_routing("orders", 4, vec![2, 3]);

    Harness {
        dialer: FakeDialer::new(Arc::clone(&cluster)),
        names: FakeNameResolver::new(&[A1, A2]),
        cluster,
        a1,
        a2,
    }
}

fn optimized() -> DialOptions {
    DialOptions::new(
        RoutingConfig::default()
            .with_optimized_routing(true)
            .with_resolve_interval(Duration::from_secs(3600)),
    )
}

async fn dial(h: &Harness) -> RoutingClient {
    RoutingClient::dial_with(
        "cluster.local",
        optimized(),
        h.dialer.clone(),
        h.names.clone(),
    )
    .await
    .unwrap()
}

/// Keys whose vbucket (of four) is `vbucket`.
fn keys_for_vbucket(vbucket: u32, count: usize) -> Vec<String> {
    (0..)
        .map(|i| format!("order-{}", i))
        .filter(|k| vbucket_for_key(k.as_bytes(), 4) == Some(vbucket))
        .take(count)
        .collect()
}

fn owner_of(client: &RoutingClient, vbucket: u32) -> Option<Address> {
    client
        .picker_snapshot()
        .and_then(|s| s.owner_address_of("orders", vbucket).cloned())
}

#[tokio::test]
async fn test_orders_routing_end_to_end() {
    let h = orders_cluster();
    let client = dial(&h).await;

    // The first pass published and the resolver is waiting again.
    assert_eq!(client.resolver_phase(), Some(ResolverPhase::Idle));
    assert_eq!(h.dialer.dial_count(), 2);
    assert_eq!(owner_of(&client, 0), Some(Address::new(A1)));
    assert_eq!(owner_of(&client, 1), Some(Address::new(A1)));
    assert_eq!(owner_of(&client, 2), Some(Address::new(A2)));
    assert_eq!(owner_of(&client, 3), Some(Address::new(A2)));

    for vbucket in 0..4 {
        let expected = if vbucket < 2 { A1 } else { A2 };
        for key in keys_for_vbucket(vbucket, 3) {
            let conn = client.fetch_connection_for_key("orders", &key).unwrap();
            assert_eq!(conn.address().as_str(), expected, "key {}", key);
        }
    }

    // A2's stream closes: its ownership is dropped instead of going stale.
    h.a2.break_stream("orders");
    eventually("vbucket 2 to lose its owner", || owner_of(&client, 2).is_none()).await;
    assert_eq!(owner_of(&client, 0), Some(Address::new(A1)));

    // Keys of vbucket 2 still get a connection through the fallback.
    let key = &keys_for_vbucket(2, 1)[0];
    assert_ok!(client.fetch_connection_for_key("orders", key));

    // A2 disappears from name resolution.
    let a2_conn = client
        .picker_snapshot()
        .unwrap()
        .ready()
        .iter()
        .find(|c| c.address().as_str() == A2)
        .cloned()
        .unwrap();
    h.names.set_addresses(&[A1]);
    assert_ok!(client.resolve().await);

    assert!(a2_conn.is_closed());
    let snapshot = client.picker_snapshot().unwrap();
    assert_eq!(snapshot.ready_addresses(), &[Address::new(A1)]);
    for vbucket in 0..4 {
        for key in keys_for_vbucket(vbucket, 2) {
            let conn = client.fetch_connection_for_key("orders", &key).unwrap();
            assert_eq!(conn.address().as_str(), A1);
        }
    }
    assert_eq!(
        client.connection_state(),
        ConnectionState::Open { ready: 1, total: 1 }
    );

    assert_ok!(client.close());
}

#[tokio::test]
async fn test_kv_calls_reach_owner() {
    let h = orders_cluster();
    let client = dial(&h).await;

    for vbucket in 0..4 {
        let expected = if vbucket < 2 { A1 } else { A2 };
        for key in keys_for_vbucket(vbucket, 2) {
            let doc = client
                .kv_v1()
                .get(shardgate::rpc::GetRequest {
                    id: shardgate::rpc::DocumentId::new("orders", key),
                })
                .await
                .unwrap();
            assert_eq!(doc.content, expected.as_bytes());
        }
    }
    assert_eq!(h.a1.kv_calls(), 4);
    assert_eq!(h.a2.kv_calls(), 4);
}

#[tokio::test]
async fn test_ownership_change_is_published_between_passes() {
    let h = orders_cluster();
    let client = dial(&h).await;
    let lookups = h.names.lookups();

    h.a2.set_routing("orders", 4, vec![3]);
    h.a1.set_routing("orders", 4, vec![0, 1, 2]);

    eventually("vbucket 2 to move to A1", || {
        owner_of(&client, 2) == Some(Address::new(A1))
    })
    .await;
    assert_eq!(owner_of(&client, 3), Some(Address::new(A2)));
    // No resolution pass was needed.
    assert_eq!(h.names.lookups(), lookups);
}

#[tokio::test]
async fn test_failed_pass_keeps_last_known_good() {
    let h = orders_cluster();
    let client = dial(&h).await;

    h.names.set_failing(true);
    let err = client.resolve().await.unwrap_err();
    assert!(matches!(err, RoutingError::Lookup { .. }));
    assert_eq!(client.resolver_phase(), Some(ResolverPhase::Idle));

    assert_eq!(owner_of(&client, 2), Some(Address::new(A2)));
    assert_eq!(
        client.connection_state(),
        ConnectionState::Open { ready: 2, total: 2 }
    );

    // A node that cannot be dialed also aborts the pass without damage.
    h.names.set_failing(false);
    h.names.set_addresses(&[A1, A2, "10.0.0.9:18098"]);
    assert_err!(client.resolve().await);
    assert_eq!(owner_of(&client, 0), Some(Address::new(A1)));
    assert_eq!(owner_of(&client, 2), Some(Address::new(A2)));
}

#[tokio::test]
async fn test_unchanged_pass_publishes_nothing() {
    let h = orders_cluster();
    let client = dial(&h).await;
    let before = client.picker_snapshot().unwrap();

    assert_ok!(client.resolve().await);

    assert_eq!(client.resolver_phase(), Some(ResolverPhase::Idle));
    assert!(Arc::ptr_eq(&before, &client.picker_snapshot().unwrap()));
    assert_eq!(h.dialer.dial_count(), 2);
}

#[tokio::test]
async fn test_initial_failure_recovers_in_background() {
    let h = orders_cluster();
    h.names.set_failing(true);
    let client = dial(&h).await;

    assert!(matches!(
        client.fetch_connection(None),
        Err(RoutingError::NoAvailableBackend)
    ));

    h.names.set_failing(false);
    client.resolve_now();
    eventually("the background pass to publish", || {
        owner_of(&client, 2) == Some(Address::new(A2))
    })
    .await;
    assert_ok!(client.fetch_connection(None));
}

#[tokio::test]
async fn test_new_node_joins_on_resolve_now() {
    let h = orders_cluster();
    let client = dial(&h).await;

    let a3 = h.cluster.add_node("10.0.0.3:18098");
    a3.set_buckets(&["orders"]);
    a3.set_routing("orders", 4, vec![]);
    h.names.set_addresses(&[A1, A2, "10.0.0.3:18098"]);

    client.resolve_now();
    eventually("the third node to become ready", || {
        client
            .picker_snapshot()
            .map_or(false, |s| s.ready_count() == 3)
    })
    .await;
    assert_eq!(h.dialer.dial_count(), 3);
}

#[tokio::test]
async fn test_removed_bucket_is_pruned() {
    let h = orders_cluster();
    let client = dial(&h).await;
    assert_eq!(
        client.picker_snapshot().unwrap().num_vbuckets("orders"),
        Some(4)
    );

    h.a1.set_buckets(&[]);
    h.a2.set_buckets(&[]);
    assert_ok!(client.resolve().await);

    let snapshot = client.picker_snapshot().unwrap();
    assert_eq!(snapshot.num_vbuckets("orders"), None);
    assert_eq!(snapshot.ready_count(), 2);
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let h = orders_cluster();
    let client = dial(&h).await;
    let conn = client.fetch_connection(None).unwrap();

    assert_ok!(client.close());
    assert_ok!(client.close());

    assert!(conn.is_closed());
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert!(matches!(
        client.fetch_connection(None),
        Err(RoutingError::Closed)
    ));
    assert!(matches!(client.resolve().await, Err(RoutingError::Closed)));
    assert_eq!(client.resolver_phase(), None);

    // Dropped silently.
    let lookups = h.names.lookups();
    client.resolve_now();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.names.lookups(), lookups);
}

#[tokio::test]
async fn test_dead_connection_leaves_fallback() {
    init_tracing();
    let cluster = FakeCluster::new();
    cluster.add_node(A1);
    cluster.add_node(A2);
    let names = FakeNameResolver::new(&[A1, A2]);
    let client = RoutingClient::dial_with(
        "cluster.local",
        optimized(),
        FakeDialer::new(Arc::clone(&cluster)),
        names.clone(),
    )
    .await
    .unwrap();
    let lookups = names.lookups();

    let snapshot = client.picker_snapshot().unwrap();
    assert_eq!(snapshot.ready_count(), 2);
    let a2_conn = snapshot
        .ready()
        .iter()
        .find(|c| c.address().as_str() == A2)
        .cloned()
        .unwrap();

    a2_conn.close().unwrap();
    eventually("the closed connection to leave the fallback list", || {
        client
            .picker_snapshot()
            .map_or(false, |s| s.ready_count() == 1)
    })
    .await;

    for _ in 0..4 {
        let conn = client.fetch_connection(None).unwrap();
        assert!(conn.is_ready());
        assert_eq!(conn.address().as_str(), A1);
    }
    // No resolution pass was needed.
    assert_eq!(names.lookups(), lookups);
}

#[tokio::test]
async fn test_oversized_vbucket_count_is_ignored() {
    let h = orders_cluster();
    let client = dial(&h).await;

    h.a2.set_routing("orders", 1 << 26, vec![0]);
    eventually("A2's ownership to be dropped", || owner_of(&client, 2).is_none()).await;

    let snapshot = client.picker_snapshot().unwrap();
    assert_eq!(snapshot.num_vbuckets("orders"), Some(4));
    assert_eq!(snapshot.ready_count(), 2);
    assert_eq!(owner_of(&client, 0), Some(Address::new(A1)));
    assert_eq!(owner_of(&client, 3), None);
}

#[tokio::test]
async fn test_silent_routing_stream_fails_setup() {
    let h = orders_cluster();
    h.a2.stall_stream("orders");

    let mut config = RoutingConfig::default()
        .with_optimized_routing(true)
        .with_resolve_interval(Duration::from_secs(3600));
    config.request_timeout_ms = 200;
    let client = tokio::time::timeout(
        Duration::from_secs(5),
        RoutingClient::dial_with(
            "cluster.local",
            DialOptions::new(config),
            h.dialer.clone(),
            h.names.clone(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(client.resolver_phase(), Some(ResolverPhase::Idle));
    assert!(matches!(
        client.fetch_connection(None),
        Err(RoutingError::NoAvailableBackend)
    ));

    let err = tokio::time::timeout(Duration::from_secs(5), client.resolve())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        RoutingError::WatchSetup { ref address, .. } if address.as_str() == A2
    ));
}
