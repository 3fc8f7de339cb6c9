//! Cloneable façade for one Ready session.
//!
//! [`SessionHandle`] hides the channel plumbing: every operation is a
//! command plus a oneshot reply round-trip to the session worker, which
//! serializes all mutations against the tree. A closed send or reply
//! channel means the session left `Ready`, surfaced as
//! [`RuntimeError::SessionNotReady`].

use std::sync::Arc;

use serde_json::{Number, Value};
use tokio::sync::{mpsc, oneshot};

use state_core::{ChangeRecord, Path, PathError, PlayerId, numeric};

use super::errors::{Result, RuntimeError};
use crate::events::ReplicationChannel;
use crate::workers::{flush, session};

/// Client-facing handle to one active session.
#[derive(Clone)]
pub struct SessionHandle {
    player: PlayerId,
    session_tx: mpsc::Sender<session::Command>,
    flush_tx: mpsc::Sender<flush::Command>,
    replication: Arc<ReplicationChannel>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("player", &self.player)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(
        player: PlayerId,
        session_tx: mpsc::Sender<session::Command>,
        flush_tx: mpsc::Sender<flush::Command>,
        replication: Arc<ReplicationChannel>,
    ) -> Self {
        Self {
            player,
            session_tx,
            flush_tx,
            replication,
        }
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    fn not_ready(&self) -> RuntimeError {
        RuntimeError::SessionNotReady {
            player: self.player.clone(),
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> session::Command,
    ) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| self.not_ready())?;
        reply_rx.await.map_err(|_| self.not_ready())
    }

    /// Write a value at a textual path, creating intermediate containers.
    pub async fn set(&self, path: &str, value: Value) -> Result<ChangeRecord> {
        self.set_path(Path::parse(path)?, value).await
    }

    /// Write a value at a pre-parsed path.
    pub async fn set_path(&self, path: Path, value: Value) -> Result<ChangeRecord> {
        self.request(|reply| session::Command::Apply { path, value, reply })
            .await?
    }

    /// Read the value at a textual path.
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.get_path(&Path::parse(path)?).await
    }

    /// Read the value at a pre-parsed path.
    pub async fn get_path(&self, path: &Path) -> Result<Option<Value>> {
        let path = path.clone();
        self.request(|reply| session::Command::Read { path, reply })
            .await
    }

    /// Remove the value at a path, returning it if it existed.
    pub async fn remove(&self, path: &str) -> Result<Option<Value>> {
        let path = Path::parse(path)?;
        let record = self
            .request(|reply| session::Command::Remove { path, reply })
            .await??;
        Ok(record.and_then(|r| r.old_value))
    }

    /// Defensive copy of the full state tree.
    pub async fn read_all(&self) -> Result<Value> {
        self.request(|reply| session::Command::ReadAll { reply })
            .await
    }

    /// Add `delta` to the numeric value at `path`, returning the new value.
    ///
    /// The current value must be numeric; anything else (including an
    /// absent value) is a `TypeMismatch`.
    pub async fn increment(&self, path: &str, delta: impl Into<Number>) -> Result<Number> {
        let parsed = Path::parse(path)?;
        let delta = delta.into();
        let record = self
            .request(|reply| session::Command::Increment {
                path: parsed,
                delta,
                reply,
            })
            .await??;
        match record.new_value {
            Some(Value::Number(n)) => Ok(n),
            _ => Err(PathError::TypeMismatch {
                at: path.to_string(),
                expected: "number",
            }
            .into()),
        }
    }

    /// Subtract `delta` from the numeric value at `path`.
    pub async fn decrement(&self, path: &str, delta: impl Into<Number>) -> Result<Number> {
        let delta = numeric::negate(&delta.into());
        self.increment(path, delta).await
    }

    /// [`increment`](Self::increment) with the default delta of 1.
    pub async fn increment_one(&self, path: &str) -> Result<Number> {
        self.increment(path, 1).await
    }

    /// [`decrement`](Self::decrement) with the default delta of 1.
    pub async fn decrement_one(&self, path: &str) -> Result<Number> {
        self.decrement(path, 1).await
    }

    /// Append to the sequence at `path` (created if absent).
    ///
    /// Returns the 1-based index of the new element.
    pub async fn add_to_array(&self, path: &str, value: Value) -> Result<usize> {
        let path = Path::parse(path)?;
        let (_, index) = self
            .request(|reply| session::Command::AddToArray { path, value, reply })
            .await??;
        Ok(index)
    }

    /// Replace the element at 1-based `index` of the sequence at `path`.
    pub async fn update_array_item(
        &self,
        path: &str,
        index: usize,
        value: Value,
    ) -> Result<ChangeRecord> {
        let parsed = Path::parse(path)?;
        let index = one_based(path, index)?;
        self.request(|reply| session::Command::UpdateArrayItem {
            path: parsed,
            index,
            value,
            reply,
        })
        .await?
    }

    /// Remove the element at 1-based `index`, shifting the rest left.
    pub async fn remove_from_array(&self, path: &str, index: usize) -> Result<Option<Value>> {
        let parsed = Path::parse(path)?;
        let index = one_based(path, index)?;
        let record = self
            .request(|reply| session::Command::RemoveFromArray {
                path: parsed,
                index,
                reply,
            })
            .await??;
        Ok(record.and_then(|r| r.old_value))
    }

    /// Set `key` in the mapping at `path` (created if absent).
    pub async fn set_in_dict(&self, path: &str, key: &str, value: Value) -> Result<ChangeRecord> {
        let path = Path::parse(path)?;
        let key = key.to_string();
        self.request(|reply| session::Command::SetInDict {
            path,
            key,
            value,
            reply,
        })
        .await?
    }

    /// Read `key` from the mapping at `path`.
    pub async fn get_from_dict(&self, path: &str, key: &str) -> Result<Option<Value>> {
        let path = Path::parse(path)?;
        let key = key.to_string();
        self.request(|reply| session::Command::GetFromDict { path, key, reply })
            .await?
    }

    /// Remove `key` from the mapping at `path`, returning it if present.
    pub async fn remove_from_dict(&self, path: &str, key: &str) -> Result<Option<Value>> {
        let path = Path::parse(path)?;
        let key = key.to_string();
        let record = self
            .request(|reply| session::Command::RemoveFromDict { path, key, reply })
            .await??;
        Ok(record.and_then(|r| r.old_value))
    }

    /// Apply a list of writes as a sequence of individual mutations.
    ///
    /// NOT a transaction: entries are applied in order and a mid-list
    /// failure stops processing, leaving every earlier entry applied (each
    /// with its own change record and dirty mark).
    pub async fn batch_set_values(&self, entries: Vec<(Path, Value)>) -> Result<Vec<ChangeRecord>> {
        self.request(|reply| session::Command::BatchSet { entries, reply })
            .await?
    }

    /// Force a synchronous flush of the current snapshot to the backing
    /// store, regardless of the schedule.
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.flush_tx
            .send(flush::Command::Flush { reply: reply_tx })
            .await
            .map_err(|_| self.not_ready())?;
        reply_rx.await.map_err(|_| self.not_ready())?
    }

    /// Register a local change listener.
    ///
    /// The callback fires synchronously, in registration order, for every
    /// change whose path is a prefix of, equal to, or a descendant of
    /// `filter`.
    pub fn on_changed(
        &self,
        filter: &str,
        callback: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> Result<()> {
        self.replication.subscribe(Path::parse(filter)?, callback);
        Ok(())
    }
}

// Sugar operations take 1-based indices to match the path syntax.
fn one_based(path: &str, index: usize) -> Result<usize> {
    index.checked_sub(1).ok_or_else(|| {
        PathError::IndexOutOfRange {
            at: path.to_string(),
            index: 0,
            len: 0,
        }
        .into()
    })
}
