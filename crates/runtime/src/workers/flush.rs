//! Flush scheduler for coordinated, rate-bounded persistence.
//!
//! One worker per session accumulates pending work through the dirty set
//! and writes whole-record snapshots to the backing store. Triggers are the
//! per-session interval timer, a dirty-count threshold kick from the
//! session worker, a forced `Flush`, or the `FinalFlush` issued at
//! teardown — whichever comes first. The single worker loop means at most
//! one flush is in flight per session.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, MissedTickBehavior, sleep};
use tracing::{debug, error, info, trace, warn};

use state_core::PlayerId;

use crate::api::errors::{Result, RuntimeError};
use crate::hooks::{HookRegistry, SaveVerdict};
use crate::store::{BackingStore, StoreError, StoreHandle};
use crate::workers::session;

/// Commands that can be sent to the flush worker.
pub(crate) enum Command {
    /// Forced synchronous flush; saves even when the dirty set is empty.
    Flush { reply: oneshot::Sender<Result<()>> },

    /// Final flush on teardown; the worker stops after replying.
    FinalFlush { reply: oneshot::Sender<Result<()>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Interval,
    Threshold,
    Forced,
    Final,
}

impl FlushReason {
    /// Scheduled flushes defer under the rate budget and skip when clean;
    /// forced and final flushes always attempt the save.
    fn is_scheduled(self) -> bool {
        matches!(self, FlushReason::Interval | FlushReason::Threshold)
    }
}

/// Knobs for one session's flush worker.
#[derive(Debug, Clone)]
pub(crate) struct FlushConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Minimum gap between scheduled saves, respecting the store's
    /// write-rate budget.
    pub min_save_gap: Duration,
}

/// Background task that persists one session's snapshots.
pub(crate) struct FlushWorker {
    player: PlayerId,
    config: FlushConfig,
    store: Arc<dyn BackingStore>,
    store_handle: StoreHandle,
    hooks: Arc<HookRegistry>,
    session_tx: mpsc::Sender<session::Command>,
    command_rx: mpsc::Receiver<Command>,
    kick_rx: mpsc::Receiver<()>,
    last_save: Option<Instant>,
}

impl FlushWorker {
    pub(crate) fn new(
        player: PlayerId,
        config: FlushConfig,
        store: Arc<dyn BackingStore>,
        store_handle: StoreHandle,
        hooks: Arc<HookRegistry>,
        session_tx: mpsc::Sender<session::Command>,
        command_rx: mpsc::Receiver<Command>,
        kick_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            player,
            config,
            store,
            store_handle,
            hooks,
            session_tx,
            command_rx,
            kick_rx,
            last_save: None,
        }
    }

    /// Main worker loop.
    pub(crate) async fn run(mut self) {
        debug!(
            target: "runtime::flush",
            player = %self.player,
            interval = ?self.config.interval,
            "flush worker started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval's first tick completes immediately; a fresh session has
        // nothing worth persisting yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.flush_cycle(FlushReason::Interval).await {
                        warn!(
                            target: "runtime::flush",
                            player = %self.player,
                            %error,
                            "scheduled flush failed; dirty set retained for next cycle"
                        );
                    }
                }
                kick = self.kick_rx.recv() => {
                    let Some(()) = kick else { break };
                    if let Err(error) = self.flush_cycle(FlushReason::Threshold).await {
                        warn!(
                            target: "runtime::flush",
                            player = %self.player,
                            %error,
                            "threshold flush failed; dirty set retained for next cycle"
                        );
                    }
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(Command::Flush { reply }) => {
                        let _ = reply.send(self.flush_cycle(FlushReason::Forced).await);
                    }
                    Some(Command::FinalFlush { reply }) => {
                        let _ = reply.send(self.flush_cycle(FlushReason::Final).await);
                        break;
                    }
                    None => break,
                },
            }
        }

        debug!(target: "runtime::flush", player = %self.player, "flush worker stopped");
    }

    /// One persistence cycle: snapshot, before-save hooks, bounded-retry
    /// save, then clear the dirty set up to the snapshot generation.
    async fn flush_cycle(&mut self, reason: FlushReason) -> Result<()> {
        let not_ready = || RuntimeError::SessionNotReady {
            player: self.player.clone(),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.session_tx
            .send(session::Command::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| not_ready())?;
        let mut snapshot = reply_rx.await.map_err(|_| not_ready())?;

        if reason.is_scheduled() {
            if snapshot.dirty_paths.is_empty() {
                trace!(target: "runtime::flush", player = %self.player, "nothing dirty, skipping");
                return Ok(());
            }
            if let Some(last) = self.last_save
                && last.elapsed() < self.config.min_save_gap
            {
                debug!(
                    target: "runtime::flush",
                    player = %self.player,
                    "inside write-rate budget, deferring to next cycle"
                );
                return Ok(());
            }
        }

        if self.hooks.before_save(&self.player, &mut snapshot.tree) == SaveVerdict::Veto {
            debug!(
                target: "runtime::flush",
                player = %self.player,
                "snapshot vetoed by before-save hook; dirty set retained"
            );
            return Ok(());
        }

        let dirty_count = snapshot.dirty_paths.len();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.config.max_attempts {
            attempts += 1;
            match self.store.save(&self.store_handle, &snapshot.tree).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(
                            target: "runtime::flush",
                            player = %self.player,
                            attempts,
                            "save succeeded after retries"
                        );
                    }
                    // only paths untouched since the snapshot become clean
                    let _ = self
                        .session_tx
                        .send(session::Command::MarkClean {
                            generation: snapshot.generation,
                        })
                        .await;
                    self.last_save = Some(Instant::now());
                    debug!(
                        target: "runtime::flush",
                        player = %self.player,
                        reason = ?reason,
                        dirty = dirty_count,
                        "snapshot persisted"
                    );
                    return Ok(());
                }
                Err(StoreError::RateLimited) if reason.is_scheduled() => {
                    debug!(
                        target: "runtime::flush",
                        player = %self.player,
                        "store rate limited; deferring to next cycle"
                    );
                    return Ok(());
                }
                Err(error) if error.is_retryable() && attempts < self.config.max_attempts => {
                    let delay = self.config.retry_base_delay * (1u32 << (attempts - 1));
                    warn!(
                        target: "runtime::flush",
                        player = %self.player,
                        attempt = attempts,
                        max_attempts = self.config.max_attempts,
                        %error,
                        "save failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                    last_error = Some(error);
                }
                Err(error) => {
                    last_error = Some(error);
                    break;
                }
            }
        }

        let source =
            last_error.unwrap_or_else(|| StoreError::Unavailable("save failed".to_string()));
        error!(
            target: "runtime::flush",
            player = %self.player,
            attempts,
            %source,
            "flush exhausted retry budget"
        );
        Err(RuntimeError::StoreUnavailable { attempts, source })
    }
}
