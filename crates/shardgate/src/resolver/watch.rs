//! Background tasks driven by the topology resolver.
//!
//! - one listener task per `(bucket, address)` routing subscription
//! - one aggregator task applying listener updates to the ownership map
//! - one readiness task per pooled connection, refreshing the listener when
//!   the connection stops being ready
//! - the resolve loop, woken by its interval or a resolve-now signal

use super::{ResolverShared, StateListener};
use crate::error::RoutingResult;
use crate::rpc::{Connection, RoutingWatch};
use shardgate_core::{BucketRouting, OwnershipKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// One message from a subscription listener.
#[derive(Debug)]
pub(crate) struct RoutingUpdate {
    pub key: OwnershipKey,
    pub subscription_id: u64,
    /// New ownership, `Ok(None)` for a bucket without vbuckets, or the error
    /// that ended the subscription.
    pub result: RoutingResult<Option<BucketRouting>>,
}

/// Resolve once the shutdown flag is set or its sender is gone.
pub(crate) async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Forward every message of `watch` to the aggregator until it fails.
pub(crate) async fn subscription_task(
    key: OwnershipKey,
    subscription_id: u64,
    mut routing: RoutingWatch,
    updates: mpsc::UnboundedSender<RoutingUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown_signal(&mut shutdown) => return,
            message = routing.next() => message,
        };

        let ended = message.is_err();
        let update = RoutingUpdate {
            key: key.clone(),
            subscription_id,
            result: message.map(|resp| resp.bucket_routing()),
        };
        if updates.send(update).is_err() || ended {
            debug!("Routing subscription {} for {} ended", subscription_id, key);
            return;
        }
    }
}

/// Refresh `listener` once `connection` stops being ready.
pub(crate) async fn readiness_task(
    connection: Connection,
    listener: Arc<dyn StateListener>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = shutdown_signal(&mut shutdown) => return,
        _ = connection.terminated() => {}
    }
    debug!("Connection to {} is no longer ready", connection.address());
    listener.refresh();
}

/// Apply listener updates in arrival order.
pub(crate) async fn aggregator_task(
    shared: Arc<ResolverShared>,
    mut updates: mpsc::UnboundedReceiver<RoutingUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_signal(&mut shutdown) => break,
            update = updates.recv() => match update {
                Some(update) => shared.apply_update(update),
                None => break,
            },
        }
    }
    debug!("Routing aggregator stopped");
}

/// Run a pass every `interval`, or sooner when resolve-now is signalled.
///
/// The interval restarts after every pass.
pub(crate) async fn resolve_loop(
    shared: Arc<ResolverShared>,
    interval: Duration,
    mut resolve_now: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_signal(&mut shutdown) => break,
            _ = tokio::time::sleep(interval) => {}
            signal = resolve_now.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = shutdown_signal(&mut shutdown) => break,
            // Failures are logged by the pass itself.
            _ = shared.run_pass() => {}
        }
    }
    debug!("Resolve loop stopped");
}
