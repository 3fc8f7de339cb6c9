//! Immutable descriptions of successful mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;
use crate::types::PlayerId;

/// One successful mutation against a session's state tree.
///
/// Produced exactly once per mutation (even when the new value equals the
/// old one) and consumed by replication, leaderboard indexing, and the flush
/// scheduler. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub session_id: PlayerId,
    pub path: Path,
    /// Value previously at the path, `None` when the path was absent.
    pub old_value: Option<Value>,
    /// Value now at the path, `None` for a removal.
    pub new_value: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(
        session_id: PlayerId,
        path: Path,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            session_id,
            path,
            old_value,
            new_value,
            timestamp: Utc::now(),
        }
    }
}
