//! Session worker that owns one session's authoritative state tree.
//!
//! Receives commands from [`crate::SessionHandle`], applies mutations
//! through [`state_core::resolver`], and drives the leaderboard index and
//! replication channel inline. Because every mutation is one turn of this
//! worker's loop, per-session serialization and FIFO replication come for
//! free, and a `Snapshot` reply can never observe a half-applied mutation.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde_json::{Number, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use state_core::{ChangeRecord, Path, PathError, PathStep, PlayerId, numeric, resolver};

use crate::api::errors::Result;
use crate::events::ReplicationChannel;
use crate::leaderboard::LeaderboardIndex;
use crate::types::FlushSnapshot;

/// Commands that can be sent to the session worker.
pub(crate) enum Command {
    Apply {
        path: Path,
        value: Value,
        reply: oneshot::Sender<Result<ChangeRecord>>,
    },
    Remove {
        path: Path,
        reply: oneshot::Sender<Result<Option<ChangeRecord>>>,
    },
    Read {
        path: Path,
        reply: oneshot::Sender<Option<Value>>,
    },
    ReadAll {
        reply: oneshot::Sender<Value>,
    },
    Increment {
        path: Path,
        delta: Number,
        reply: oneshot::Sender<Result<ChangeRecord>>,
    },
    AddToArray {
        path: Path,
        value: Value,
        reply: oneshot::Sender<Result<(ChangeRecord, usize)>>,
    },
    UpdateArrayItem {
        path: Path,
        index: usize,
        value: Value,
        reply: oneshot::Sender<Result<ChangeRecord>>,
    },
    RemoveFromArray {
        path: Path,
        index: usize,
        reply: oneshot::Sender<Result<Option<ChangeRecord>>>,
    },
    SetInDict {
        path: Path,
        key: String,
        value: Value,
        reply: oneshot::Sender<Result<ChangeRecord>>,
    },
    GetFromDict {
        path: Path,
        key: String,
        reply: oneshot::Sender<Result<Option<Value>>>,
    },
    RemoveFromDict {
        path: Path,
        key: String,
        reply: oneshot::Sender<Result<Option<ChangeRecord>>>,
    },
    BatchSet {
        entries: Vec<(Path, Value)>,
        reply: oneshot::Sender<Result<Vec<ChangeRecord>>>,
    },
    /// Consistent view for the flush scheduler; taken between mutations.
    Snapshot {
        reply: oneshot::Sender<FlushSnapshot>,
    },
    /// Clear dirty paths whose last mutation is at or before `generation`.
    MarkClean { generation: u64 },
    /// Replace the whole tree (data wipe), replicating per top-level key.
    Wipe {
        tree: Value,
        reply: oneshot::Sender<()>,
    },
    /// Stop the worker and hand back the final tree.
    Close {
        reply: oneshot::Sender<Value>,
    },
}

/// Background task that serializes one session's mutations.
pub(crate) struct SessionWorker {
    player: PlayerId,
    tree: Value,
    /// Changed path text → generation of its latest mutation.
    dirty: HashMap<String, u64>,
    generation: u64,
    dirty_threshold: usize,
    command_rx: mpsc::Receiver<Command>,
    replication: Arc<ReplicationChannel>,
    leaderboard: Arc<LeaderboardIndex>,
    flush_kick: mpsc::Sender<()>,
}

impl SessionWorker {
    pub(crate) fn new(
        player: PlayerId,
        tree: Value,
        dirty_threshold: usize,
        command_rx: mpsc::Receiver<Command>,
        replication: Arc<ReplicationChannel>,
        leaderboard: Arc<LeaderboardIndex>,
        flush_kick: mpsc::Sender<()>,
    ) -> Self {
        Self {
            player,
            tree,
            dirty: HashMap::new(),
            generation: 0,
            dirty_threshold,
            command_rx,
            replication,
            leaderboard,
            flush_kick,
        }
    }

    /// Main worker loop.
    pub(crate) async fn run(mut self) {
        debug!(target: "runtime::worker", player = %self.player, "session worker started");
        while let Some(cmd) = self.command_rx.recv().await {
            if let ControlFlow::Break(()) = self.handle_command(cmd).await {
                break;
            }
        }
        debug!(target: "runtime::worker", player = %self.player, "session worker stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Apply { path, value, reply } => {
                let result = self.apply(path, value).await;
                let _ = reply.send(result);
            }
            Command::Remove { path, reply } => {
                let result = self.remove(path).await;
                let _ = reply.send(result);
            }
            Command::Read { path, reply } => {
                let _ = reply.send(resolver::get(&self.tree, &path).cloned());
            }
            Command::ReadAll { reply } => {
                let _ = reply.send(self.tree.clone());
            }
            Command::Increment { path, delta, reply } => {
                let result = self.increment(path, delta).await;
                let _ = reply.send(result);
            }
            Command::AddToArray { path, value, reply } => {
                let result = self.add_to_array(path, value).await;
                let _ = reply.send(result);
            }
            Command::UpdateArrayItem {
                path,
                index,
                value,
                reply,
            } => {
                let result = self.update_array_item(path, index, value).await;
                let _ = reply.send(result);
            }
            Command::RemoveFromArray { path, index, reply } => {
                let result = self.remove_from_array(path, index).await;
                let _ = reply.send(result);
            }
            Command::SetInDict {
                path,
                key,
                value,
                reply,
            } => {
                let result = self.set_in_dict(path, key, value).await;
                let _ = reply.send(result);
            }
            Command::GetFromDict { path, key, reply } => {
                let _ = reply.send(self.get_from_dict(&path, &key));
            }
            Command::RemoveFromDict { path, key, reply } => {
                let result = self.remove_from_dict(path, key).await;
                let _ = reply.send(result);
            }
            Command::BatchSet { entries, reply } => {
                let result = self.batch_set(entries).await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(FlushSnapshot {
                    tree: self.tree.clone(),
                    dirty_paths: self.dirty.keys().cloned().collect(),
                    generation: self.generation,
                });
            }
            Command::MarkClean { generation } => {
                self.dirty.retain(|_, last| *last > generation);
            }
            Command::Wipe { tree, reply } => {
                self.wipe(tree).await;
                let _ = reply.send(());
            }
            Command::Close { reply } => {
                let _ = reply.send(std::mem::take(&mut self.tree));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Write `value` at `path` and emit exactly one change record.
    ///
    /// No no-op suppression: an equal old and new value still dirties the
    /// path and replicates.
    async fn apply(&mut self, path: Path, value: Value) -> Result<ChangeRecord> {
        let old = resolver::set(&mut self.tree, &path, value.clone())?;
        let record = ChangeRecord::new(self.player.clone(), path, old, Some(value));
        self.commit(&record).await;
        Ok(record)
    }

    async fn remove(&mut self, path: Path) -> Result<Option<ChangeRecord>> {
        let Some(removed) = resolver::remove(&mut self.tree, &path)? else {
            return Ok(None);
        };
        let record = ChangeRecord::new(self.player.clone(), path, Some(removed), None);
        self.commit(&record).await;
        Ok(Some(record))
    }

    async fn increment(&mut self, path: Path, delta: Number) -> Result<ChangeRecord> {
        let current = match resolver::get(&self.tree, &path) {
            Some(Value::Number(n)) => n.clone(),
            _ => return Err(numeric_mismatch(&path).into()),
        };
        let next = numeric::add(&current, &delta);
        self.apply(path, Value::Number(next)).await
    }

    /// Bookkeeping shared by every successful mutation: dirty marking,
    /// leaderboard update, replication, and the threshold kick.
    async fn commit(&mut self, record: &ChangeRecord) {
        self.generation += 1;
        let path_text = record.path.to_string();
        self.dirty.insert(path_text.clone(), self.generation);

        if let Some(new_value) = &record.new_value
            && self.leaderboard.is_tracked(&path_text)
            && let Some(score) = LeaderboardIndex::score_from_value(new_value)
        {
            self.leaderboard.update(&path_text, &self.player, score);
        }

        self.replication.publish(record, &self.tree).await;

        if self.dirty.len() >= self.dirty_threshold {
            // capacity-1 channel; a full kick means a flush is already due
            let _ = self.flush_kick.try_send(());
        }
    }

    async fn add_to_array(&mut self, path: Path, value: Value) -> Result<(ChangeRecord, usize)> {
        let index = match resolver::get(&self.tree, &path) {
            Some(Value::Array(arr)) => arr.len(),
            None | Some(Value::Null) => 0,
            Some(_) => return Err(container_mismatch(&path, "array").into()),
        };
        let record = self.apply(path.child(PathStep::Index(index)), value).await?;
        Ok((record, index + 1))
    }

    async fn update_array_item(
        &mut self,
        path: Path,
        index: usize,
        value: Value,
    ) -> Result<ChangeRecord> {
        match resolver::get(&self.tree, &path) {
            Some(Value::Array(arr)) if index < arr.len() => {
                self.apply(path.child(PathStep::Index(index)), value).await
            }
            Some(Value::Array(arr)) => Err(PathError::IndexOutOfRange {
                at: path.to_string(),
                index: index + 1,
                len: arr.len(),
            }
            .into()),
            Some(_) => Err(container_mismatch(&path, "array").into()),
            None => Err(PathError::IndexOutOfRange {
                at: path.to_string(),
                index: index + 1,
                len: 0,
            }
            .into()),
        }
    }

    async fn remove_from_array(
        &mut self,
        path: Path,
        index: usize,
    ) -> Result<Option<ChangeRecord>> {
        match resolver::get(&self.tree, &path) {
            Some(Value::Array(_)) => self.remove(path.child(PathStep::Index(index))).await,
            None | Some(Value::Null) => Ok(None),
            Some(_) => Err(container_mismatch(&path, "array").into()),
        }
    }

    async fn set_in_dict(&mut self, path: Path, key: String, value: Value) -> Result<ChangeRecord> {
        match resolver::get(&self.tree, &path) {
            None | Some(Value::Null) | Some(Value::Object(_)) => {
                self.apply(path.child(PathStep::Key(key)), value).await
            }
            Some(_) => Err(container_mismatch(&path, "object").into()),
        }
    }

    fn get_from_dict(&self, path: &Path, key: &str) -> Result<Option<Value>> {
        match resolver::get(&self.tree, path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(map.get(key).cloned()),
            Some(_) => Err(container_mismatch(path, "object").into()),
        }
    }

    async fn remove_from_dict(&mut self, path: Path, key: String) -> Result<Option<ChangeRecord>> {
        match resolver::get(&self.tree, &path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(_)) => self.remove(path.child(PathStep::Key(key))).await,
            Some(_) => Err(container_mismatch(&path, "object").into()),
        }
    }

    /// Apply entries in order. Sequential best-effort: a mid-list failure
    /// stops processing and leaves earlier mutations applied.
    async fn batch_set(&mut self, entries: Vec<(Path, Value)>) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::with_capacity(entries.len());
        for (path, value) in entries {
            records.push(self.apply(path, value).await?);
        }
        Ok(records)
    }

    /// Replace the tree and replicate the reset per top-level key, so
    /// observers and the dirty set converge on the new contents.
    async fn wipe(&mut self, replacement: Value) {
        let old_tree = std::mem::replace(&mut self.tree, replacement);

        let mut keys: Vec<String> = Vec::new();
        if let Value::Object(map) = &old_tree {
            keys.extend(map.keys().cloned());
        }
        if let Value::Object(map) = &self.tree {
            for key in map.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }

        for key in keys {
            let path = Path::from_steps(vec![PathStep::Key(key.clone())]);
            let old = old_tree.get(&key).cloned();
            let new = self.tree.get(&key).cloned();
            let record = ChangeRecord::new(self.player.clone(), path, old, new);
            self.commit(&record).await;
        }

        info!(target: "runtime::worker", player = %self.player, "state tree wiped");
    }
}

fn numeric_mismatch(path: &Path) -> PathError {
    PathError::TypeMismatch {
        at: path.to_string(),
        expected: "number",
    }
}

fn container_mismatch(path: &Path, expected: &'static str) -> PathError {
    PathError::TypeMismatch {
        at: path.to_string(),
        expected,
    }
}
