//! High-level session orchestrator.
//!
//! [`SessionManager`] owns the lifecycle of every active session: exclusive
//! acquisition against the backing store, load, wiring the worker tasks
//! together, and orderly teardown (final flush + lease release). It exposes
//! a builder-based API in the usual shape: configure collaborators once,
//! then drive sessions through [`SessionHandle`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use state_core::PlayerId;

use crate::api::errors::{Result, RuntimeError};
use crate::api::handle::SessionHandle;
use crate::events::{NullTransport, ObserverTransport, ReplicationChannel};
use crate::hooks::{HookRegistry, LifecycleHook};
use crate::leaderboard::{LeaderboardEntry, LeaderboardIndex};
use crate::store::{BackingStore, StoreError, StoreHandle};
use crate::types::SessionStatus;
use crate::workers::flush::{self, FlushConfig, FlushWorker};
use crate::workers::session::{self, SessionWorker};

/// Session configuration shared across the orchestrator and workers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Automatic flush cadence per session.
    pub flush_interval: Duration,
    /// Dirty-path count that triggers a flush ahead of the interval.
    pub dirty_threshold: usize,
    /// Bounded retry budget for one save.
    pub max_save_attempts: u32,
    /// Base delay of the exponential save backoff.
    pub save_retry_base_delay: Duration,
    /// Minimum gap between scheduled saves (backing-store rate budget).
    pub min_save_gap: Duration,
    /// How long teardown waits for the final flush before proceeding.
    pub teardown_timeout: Duration,
    pub command_buffer_size: usize,
    /// Rebuild leaderboard entries from the loaded blob at session start.
    pub seed_leaderboard_on_load: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            dirty_threshold: 16,
            max_save_attempts: 5,
            save_retry_base_delay: Duration::from_millis(100),
            min_save_gap: Duration::from_secs(6),
            teardown_timeout: Duration::from_secs(10),
            command_buffer_size: 32,
            seed_leaderboard_on_load: true,
        }
    }
}

enum SessionSlot {
    /// Occupies the identity while a lifecycle transition runs.
    Transitioning(SessionStatus),
    Active(ActiveSession),
}

struct ActiveSession {
    handle: SessionHandle,
    store_handle: StoreHandle,
    session_tx: mpsc::Sender<session::Command>,
    flush_tx: mpsc::Sender<flush::Command>,
    worker: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

/// Orchestrator owning every active session and the shared leaderboard.
///
/// Sessions are fully independent: each gets its own worker and flush task,
/// so no operation against one session can block another.
pub struct SessionManager {
    config: SessionConfig,
    default_data: Value,
    store: Arc<dyn BackingStore>,
    transport: Arc<dyn ObserverTransport>,
    leaderboard: Arc<LeaderboardIndex>,
    hooks: Arc<HookRegistry>,
    sessions: Mutex<HashMap<PlayerId, SessionSlot>>,
}

impl SessionManager {
    /// Create a new session manager builder.
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    /// Start a session for `player`: acquire the exclusive lease, load (or
    /// default) the tree, spawn the workers, and return a handle.
    ///
    /// Exactly one session may exist per identity; a concurrent holder —
    /// local or in another process — yields
    /// [`RuntimeError::SessionAcquisitionFailed`].
    pub async fn init(&self, player: impl Into<PlayerId>) -> Result<SessionHandle> {
        let player = player.into();
        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&player) {
                return Err(RuntimeError::SessionAcquisitionFailed {
                    player: player.clone(),
                    source: StoreError::LockHeld { player },
                });
            }
            sessions.insert(
                player.clone(),
                SessionSlot::Transitioning(SessionStatus::Acquiring),
            );
        }

        match self.start_session(&player).await {
            Ok(handle) => Ok(handle),
            Err(error) => {
                self.sessions.lock().await.remove(&player);
                warn!(target: "runtime::session", %player, %error, "session start failed");
                Err(error)
            }
        }
    }

    async fn start_session(&self, player: &PlayerId) -> Result<SessionHandle> {
        debug!(target: "runtime::session", %player, "acquiring exclusive lease");
        let store_handle = self.store.acquire(player).await.map_err(|source| {
            RuntimeError::SessionAcquisitionFailed {
                player: player.clone(),
                source,
            }
        })?;

        self.set_transition_status(player, SessionStatus::Loading)
            .await;
        let tree = match self.store.load(&store_handle).await {
            Ok(Some(blob)) => blob,
            Ok(None) => self.default_data.clone(),
            Err(source) => {
                // do not leave the identity locked until lease expiry
                if let Err(release_error) = self.store.release(&store_handle).await {
                    warn!(
                        target: "runtime::session",
                        %player,
                        %release_error,
                        "lease release after failed load also failed"
                    );
                }
                return Err(RuntimeError::SessionAcquisitionFailed {
                    player: player.clone(),
                    source,
                });
            }
        };

        if self.config.seed_leaderboard_on_load {
            self.leaderboard.seed_from_tree(player, &tree);
        }

        let remote = self.transport.bind(player).await;
        let replication = Arc::new(ReplicationChannel::new(player.clone(), remote));

        let (session_tx, session_rx) = mpsc::channel(self.config.command_buffer_size);
        let (flush_tx, flush_rx) = mpsc::channel(8);
        let (kick_tx, kick_rx) = mpsc::channel(1);

        self.hooks.notify_loaded(player, &tree);

        let worker = SessionWorker::new(
            player.clone(),
            tree,
            self.config.dirty_threshold,
            session_rx,
            Arc::clone(&replication),
            Arc::clone(&self.leaderboard),
            kick_tx,
        );
        let worker_handle = tokio::spawn(worker.run());

        let flusher = FlushWorker::new(
            player.clone(),
            FlushConfig {
                interval: self.config.flush_interval,
                max_attempts: self.config.max_save_attempts,
                retry_base_delay: self.config.save_retry_base_delay,
                min_save_gap: self.config.min_save_gap,
            },
            Arc::clone(&self.store),
            store_handle.clone(),
            Arc::clone(&self.hooks),
            session_tx.clone(),
            flush_rx,
            kick_rx,
        );
        let flusher_handle = tokio::spawn(flusher.run());

        let handle = SessionHandle::new(
            player.clone(),
            session_tx.clone(),
            flush_tx.clone(),
            replication,
        );

        self.sessions.lock().await.insert(
            player.clone(),
            SessionSlot::Active(ActiveSession {
                handle: handle.clone(),
                store_handle,
                session_tx,
                flush_tx,
                worker: worker_handle,
                flusher: flusher_handle,
            }),
        );
        info!(target: "runtime::session", %player, "session ready");
        Ok(handle)
    }

    async fn set_transition_status(&self, player: &PlayerId, status: SessionStatus) {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot @ SessionSlot::Transitioning(_)) = sessions.get_mut(player) {
            *slot = SessionSlot::Transitioning(status);
        }
    }

    /// Lifecycle state of `player`'s session. Identities without a live
    /// session report `Closed`.
    pub async fn status(&self, player: &PlayerId) -> SessionStatus {
        match self.sessions.lock().await.get(player) {
            Some(SessionSlot::Transitioning(status)) => *status,
            Some(SessionSlot::Active(_)) => SessionStatus::Ready,
            None => SessionStatus::Closed,
        }
    }

    /// Handle to an already-Ready session.
    pub async fn handle(&self, player: &PlayerId) -> Result<SessionHandle> {
        match self.sessions.lock().await.get(player) {
            Some(SessionSlot::Active(active)) => Ok(active.handle.clone()),
            Some(SessionSlot::Transitioning(_)) => Err(RuntimeError::SessionNotReady {
                player: player.clone(),
            }),
            None => Err(RuntimeError::UnknownSession {
                player: player.clone(),
            }),
        }
    }

    /// Force a synchronous flush of `player`'s current snapshot.
    pub async fn save_data(&self, player: &PlayerId) -> Result<()> {
        self.handle(player).await?.flush().await
    }

    /// Tear the session down: final forced flush (bounded by
    /// `teardown_timeout`), unloaded hook, lease release.
    ///
    /// A failed or timed-out final flush is reported, but the lease is
    /// released regardless so future acquisitions are never deadlocked.
    pub async fn teardown(&self, player: &PlayerId) -> Result<()> {
        let active = {
            let mut sessions = self.sessions.lock().await;
            match sessions.remove(player) {
                Some(SessionSlot::Active(active)) => {
                    sessions.insert(
                        player.clone(),
                        SessionSlot::Transitioning(SessionStatus::Saving),
                    );
                    active
                }
                Some(slot @ SessionSlot::Transitioning(_)) => {
                    sessions.insert(player.clone(), slot);
                    return Err(RuntimeError::SessionNotReady {
                        player: player.clone(),
                    });
                }
                None => {
                    return Err(RuntimeError::UnknownSession {
                        player: player.clone(),
                    });
                }
            }
        };
        info!(target: "runtime::session", %player, "tearing down session");

        let save_result = self.final_flush(player, &active).await;

        // stop the mutation worker; the reply carries the final tree
        let (reply_tx, reply_rx) = oneshot::channel();
        let final_tree = if active
            .session_tx
            .send(session::Command::Close { reply: reply_tx })
            .await
            .is_ok()
        {
            reply_rx.await.unwrap_or(Value::Null)
        } else {
            Value::Null
        };

        self.hooks.notify_unloaded(player, &final_tree);

        if let Err(release_error) = self.store.release(&active.store_handle).await {
            warn!(target: "runtime::session", %player, %release_error, "lease release failed");
        }

        let join_result = active.worker.await.map_err(RuntimeError::WorkerJoin);

        self.sessions.lock().await.remove(player);
        debug!(target: "runtime::session", %player, "session closed");
        save_result.and(join_result)
    }

    async fn final_flush(&self, player: &PlayerId, active: &ActiveSession) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if active
            .flush_tx
            .send(flush::Command::FinalFlush { reply: reply_tx })
            .await
            .is_err()
        {
            return Err(RuntimeError::SessionNotReady {
                player: player.clone(),
            });
        }
        match tokio::time::timeout(self.config.teardown_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RuntimeError::SessionNotReady {
                player: player.clone(),
            }),
            Err(_) => {
                error!(
                    target: "runtime::session",
                    %player,
                    timeout = ?self.config.teardown_timeout,
                    "final flush timed out; data for this cycle is at risk"
                );
                active.flusher.abort();
                Err(RuntimeError::FlushTimeout {
                    player: player.clone(),
                    timeout: self.config.teardown_timeout,
                })
            }
        }
    }

    /// Reset `player`'s tree to the default data, overwrite-save it, and
    /// drop the identity from every tracked leaderboard.
    ///
    /// Works for offline identities too, through a transient acquisition.
    pub async fn wipe_data(&self, player: &PlayerId) -> Result<()> {
        let live = {
            let sessions = self.sessions.lock().await;
            match sessions.get(player) {
                Some(SessionSlot::Active(active)) => {
                    Some((active.session_tx.clone(), active.flush_tx.clone()))
                }
                Some(SessionSlot::Transitioning(_)) => {
                    return Err(RuntimeError::SessionNotReady {
                        player: player.clone(),
                    });
                }
                None => None,
            }
        };

        match live {
            Some((session_tx, flush_tx)) => {
                let not_ready = || RuntimeError::SessionNotReady {
                    player: player.clone(),
                };
                let (reply_tx, reply_rx) = oneshot::channel();
                session_tx
                    .send(session::Command::Wipe {
                        tree: self.default_data.clone(),
                        reply: reply_tx,
                    })
                    .await
                    .map_err(|_| not_ready())?;
                reply_rx.await.map_err(|_| not_ready())?;

                let (reply_tx, reply_rx) = oneshot::channel();
                flush_tx
                    .send(flush::Command::Flush { reply: reply_tx })
                    .await
                    .map_err(|_| not_ready())?;
                reply_rx.await.map_err(|_| not_ready())??;
            }
            None => {
                let store_handle = self.store.acquire(player).await.map_err(|source| {
                    RuntimeError::SessionAcquisitionFailed {
                        player: player.clone(),
                        source,
                    }
                })?;
                let save_result = self.store.save(&store_handle, &self.default_data).await;
                if let Err(release_error) = self.store.release(&store_handle).await {
                    warn!(target: "runtime::session", %player, %release_error, "lease release failed");
                }
                save_result.map_err(|source| RuntimeError::StoreUnavailable {
                    attempts: 1,
                    source,
                })?;
            }
        }

        self.leaderboard.remove_player(player);
        info!(target: "runtime::session", %player, "player data wiped");
        Ok(())
    }

    /// Read-only load of `player`'s persisted blob, bypassing session
    /// exclusivity. Never creates a Ready session or accepts mutations.
    pub async fn get_offline_data(&self, player: &PlayerId) -> Result<Option<Value>> {
        self.store
            .load_offline(player)
            .await
            .map_err(|source| RuntimeError::StoreUnavailable {
                attempts: 1,
                source,
            })
    }

    /// Top `k` entries of a tracked field's leaderboard, highest first.
    pub fn get_leaderboard(&self, field: &str, k: usize) -> Vec<LeaderboardEntry> {
        self.leaderboard.top(field, k)
    }

    /// 1-based rank of `player` under `field`.
    pub fn get_player_rank(&self, field: &str, player: &PlayerId) -> Option<usize> {
        self.leaderboard.rank_of(field, player)
    }

    /// Shared leaderboard index.
    pub fn leaderboard(&self) -> &Arc<LeaderboardIndex> {
        &self.leaderboard
    }

    /// Tear down every active session (process-wide shutdown).
    ///
    /// All sessions are attempted; the first error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let players: Vec<PlayerId> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter_map(|(player, slot)| {
                    matches!(slot, SessionSlot::Active(_)).then(|| player.clone())
                })
                .collect()
        };

        let mut first_error = None;
        for player in players {
            if let Err(error) = self.teardown(&player).await {
                warn!(target: "runtime::session", %player, %error, "teardown failed during shutdown");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Builder for [`SessionManager`] with flexible configuration.
pub struct SessionManagerBuilder {
    config: SessionConfig,
    default_data: Value,
    tracked_fields: Vec<String>,
    store: Option<Arc<dyn BackingStore>>,
    transport: Option<Arc<dyn ObserverTransport>>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl SessionManagerBuilder {
    fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            default_data: Value::Object(Map::new()),
            tracked_fields: Vec::new(),
            store: None,
            transport: None,
            hooks: Vec::new(),
        }
    }

    /// Override session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Tree given to identities with no persisted blob (the
    /// application-specific default-data schema).
    pub fn default_data(mut self, data: Value) -> Self {
        self.default_data = data;
        self
    }

    /// Add one tracked leaderboard field (a path string).
    pub fn tracked_field(mut self, field: impl Into<String>) -> Self {
        self.tracked_fields.push(field.into());
        self
    }

    /// Add several tracked leaderboard fields.
    pub fn tracked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Set the required backing store.
    pub fn store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the remote observer transport (optional; defaults to none).
    pub fn transport(mut self, transport: Arc<dyn ObserverTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register a lifecycle hook.
    pub fn hook(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Build the session manager.
    pub fn build(self) -> Result<SessionManager> {
        let store = self.store.ok_or(RuntimeError::MissingStore)?;
        let leaderboard = Arc::new(LeaderboardIndex::new(self.tracked_fields)?);
        Ok(SessionManager {
            config: self.config,
            default_data: self.default_data,
            store,
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(NullTransport)),
            leaderboard,
            hooks: Arc::new(HookRegistry::new(self.hooks)),
            sessions: Mutex::new(HashMap::new()),
        })
    }
}
