//! Shared types for session lifecycle and flush coordination.

use std::fmt;

use serde_json::Value;

/// Lifecycle states of one session.
///
/// `Ready` is the only state in which mutations and reads succeed. A
/// `Closed` or `Failed` identity can be re-initialized with a fresh
/// acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Acquiring,
    Loading,
    Ready,
    Saving,
    Closed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Acquiring => "acquiring",
            SessionStatus::Loading => "loading",
            SessionStatus::Ready => "ready",
            SessionStatus::Saving => "saving",
            SessionStatus::Closed => "closed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Consistent view of a session handed to the flush scheduler.
///
/// Taken between completed mutations, never mid-mutation. `generation` is
/// the mutation counter at snapshot time; clearing the dirty set with it
/// leaves later mutations marked dirty.
#[derive(Debug, Clone)]
pub struct FlushSnapshot {
    pub tree: Value,
    pub dirty_paths: Vec<String>,
    pub generation: u64,
}
