//! Per-session replication of change records.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{trace, warn};

use state_core::{ChangeRecord, Path, PlayerId};

use super::observer::ObserverChannel;

type ChangeCallback = Arc<dyn Fn(&ChangeRecord) + Send + Sync>;

#[derive(Clone)]
struct Listener {
    filter: Path,
    callback: ChangeCallback,
}

/// Fans one session's mutations out to its remote observer and to local
/// in-process listeners.
///
/// The remote observer receives the full new subtree rooted at the changed
/// path's top-level key (coarse replication); local listeners receive the
/// precise [`ChangeRecord`] with old and new scalar values. Publishing
/// happens inside the session worker's turn, so delivery is FIFO per
/// session by construction.
pub struct ReplicationChannel {
    player: PlayerId,
    remote: Arc<dyn ObserverChannel>,
    listeners: Mutex<Vec<Listener>>,
}

impl ReplicationChannel {
    pub fn new(player: PlayerId, remote: Arc<dyn ObserverChannel>) -> Self {
        Self {
            player,
            remote,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a local listener.
    ///
    /// The callback fires for every change whose path is a prefix of, equal
    /// to, or a descendant of `filter`. Listeners run synchronously in
    /// registration order.
    pub fn subscribe(
        &self,
        filter: Path,
        callback: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push(Listener {
                filter,
                callback: Arc::new(callback),
            });
    }

    /// Forward one successful mutation.
    ///
    /// `tree` is the session's state tree after the mutation; the subtree
    /// under the changed top-level key is what crosses the session boundary.
    pub async fn publish(&self, record: &ChangeRecord, tree: &Value) {
        if let Some(root_key) = record.path.root_key() {
            let subtree = tree.get(root_key).cloned().unwrap_or(Value::Null);
            if let Err(error) = self.remote.send(root_key, &subtree).await {
                // Best-effort here; the transport owns redelivery.
                warn!(
                    target: "runtime::replication",
                    player = %self.player,
                    root_key,
                    %error,
                    "remote observer delivery failed"
                );
            }
        }

        // Snapshot the registry so a callback that subscribes does not deadlock.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .clone();
        for listener in &listeners {
            if listener.filter.relates_to(&record.path) {
                (listener.callback)(record);
            }
        }
        trace!(
            target: "runtime::replication",
            player = %self.player,
            path = %record.path,
            "change published"
        );
    }
}
