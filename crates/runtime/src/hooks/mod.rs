//! Lifecycle hook system for session orchestration.
//!
//! Hooks observe session lifecycle transitions and gate outgoing snapshots.
//! They are registered on the [`crate::SessionManager`] builder, sorted by
//! priority, and invoked synchronously in that order — a simple callback
//! list, no dynamic routing.

mod registry;

pub use registry::HookRegistry;

use serde_json::Value;

use state_core::PlayerId;

/// Outcome of a `before_save` inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveVerdict {
    /// Persist the (possibly rewritten) snapshot.
    Persist,
    /// Skip this persistence cycle. The dirty set stays intact, so the data
    /// is retried on the next cycle.
    Veto,
}

/// Observer of one session's lifecycle.
///
/// All methods have no-op defaults; implement the ones you need.
pub trait LifecycleHook: Send + Sync {
    /// Human-readable name used in logging.
    fn name(&self) -> &'static str;

    /// Execution priority; lower values run first.
    fn priority(&self) -> i32 {
        0
    }

    /// Fired once the session reaches Ready, with the loaded tree.
    fn loaded(&self, _player: &PlayerId, _tree: &Value) {}

    /// Fired during teardown after the final flush, before lease release.
    fn unloaded(&self, _player: &PlayerId, _tree: &Value) {}

    /// Inspect or rewrite the outgoing snapshot at flush time.
    fn before_save(&self, _player: &PlayerId, _snapshot: &mut Value) -> SaveVerdict {
        SaveVerdict::Persist
    }
}
