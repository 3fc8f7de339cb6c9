//! Registry for managing and invoking lifecycle hooks.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use state_core::PlayerId;

use super::{LifecycleHook, SaveVerdict};

/// Ordered set of lifecycle hooks.
///
/// Hooks are sorted by priority at construction (lower values first) and
/// invoked synchronously in that order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookRegistry {
    pub fn new(mut hooks: Vec<Arc<dyn LifecycleHook>>) -> Self {
        hooks.sort_by_key(|h| h.priority());
        Self { hooks }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn notify_loaded(&self, player: &PlayerId, tree: &Value) {
        for hook in &self.hooks {
            hook.loaded(player, tree);
        }
    }

    pub fn notify_unloaded(&self, player: &PlayerId, tree: &Value) {
        for hook in &self.hooks {
            hook.unloaded(player, tree);
        }
    }

    /// Run `before_save` hooks against the outgoing snapshot.
    ///
    /// The first veto wins and stops the chain.
    pub fn before_save(&self, player: &PlayerId, snapshot: &mut Value) -> SaveVerdict {
        for hook in &self.hooks {
            if hook.before_save(player, snapshot) == SaveVerdict::Veto {
                debug!(
                    target: "runtime::hooks",
                    hook = hook.name(),
                    %player,
                    "snapshot vetoed"
                );
                return SaveVerdict::Veto;
            }
        }
        SaveVerdict::Persist
    }
}
