//! Backing-store contract for durable per-identity blobs.
//!
//! The durable store is an external collaborator: a key→blob service with
//! session-exclusivity primitives and an internal write-rate limit. The
//! adapters in this module give it a uniform async face; the flush scheduler
//! is responsible for respecting the rate budget.

use async_trait::async_trait;
use serde_json::Value;

use state_core::PlayerId;

use super::error::Result;

/// Proof of an exclusive lease on one identity's record.
///
/// Obtained from [`BackingStore::acquire`]; every load/save/release is
/// validated against it so a released or superseded session cannot write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHandle {
    player: PlayerId,
    token: u64,
}

impl StoreHandle {
    pub fn new(player: PlayerId, token: u64) -> Self {
        Self { player, token }
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Durable key→blob store with exclusive leases.
///
/// At most one live handle exists per identity; a second `acquire` while the
/// first is held fails with [`super::StoreError::LockHeld`]. Lease expiry
/// after abnormal process termination is the store deployment's concern
/// (heartbeat/TTL), not modelled here.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Take the exclusive lease for `player`.
    async fn acquire(&self, player: &PlayerId) -> Result<StoreHandle>;

    /// Load the persisted blob, `None` when the identity has never saved.
    async fn load(&self, handle: &StoreHandle) -> Result<Option<Value>>;

    /// Overwrite the persisted blob with a whole-record snapshot.
    async fn save(&self, handle: &StoreHandle, blob: &Value) -> Result<()>;

    /// Give the lease back. Idempotent.
    async fn release(&self, handle: &StoreHandle) -> Result<()>;

    /// Read the persisted blob without touching the lease.
    ///
    /// Used for offline inspection; never blocks or is blocked by an active
    /// session holding the lease.
    async fn load_offline(&self, player: &PlayerId) -> Result<Option<Value>>;
}
