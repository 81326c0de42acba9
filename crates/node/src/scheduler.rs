//! Periodic tick driving the node's cycles and pump watchdog.
//!
//! The node lock is held only for the synchronous tick. Whatever the tick
//! asks of the peer is delivered from its own task, and the result is fed
//! back under a fresh lock once the request returns or times out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use rover_core::{Node, PeerRequest};

use crate::notifier::Notifier;

pub type SharedNode = Arc<RwLock<Node>>;

/// Run the tick loop forever. Intended to be `tokio::spawn`-ed from main.
pub async fn run(node: SharedNode, notifier: Option<Arc<Notifier>>, tick: Duration) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        tick_ms = tick.as_millis() as u64,
        peer = notifier.as_ref().map(|n| n.peer()).unwrap_or("none"),
        "scheduler started"
    );

    loop {
        ticker.tick().await;
        let requests = node.write().await.tick(Instant::now());
        for req in requests {
            dispatch(Arc::clone(&node), notifier.clone(), req);
        }
    }
}

/// Deliver `req` in the background and report the result to the node.
pub fn dispatch(node: SharedNode, notifier: Option<Arc<Notifier>>, req: PeerRequest) {
    tokio::spawn(async move {
        debug!(?req, "delivering peer request");
        let result = match &notifier {
            Some(n) => n.deliver(&req).await,
            None => Err("no peer configured".to_string()),
        };
        if let Err(e) = &result {
            warn!(?req, "peer request failed: {e}");
        }
        node.write()
            .await
            .peer_request_finished(&req, result, Instant::now());
    });
}

// ===========================================================================
// Tests
// ===========================================================================
