//! In-memory BackingStore implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use state_core::PlayerId;

use super::error::{Result, StoreError};
use super::traits::{BackingStore, StoreHandle};

/// In-memory implementation of [`BackingStore`].
///
/// Holds blobs and leases in a `RwLock`-guarded map. Save failures and
/// rate-limit responses can be injected ahead of time, which is how the
/// retry and dirty-retention behavior of the flush scheduler is tested.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    fail_saves: AtomicU32,
    rate_limit_saves: AtomicU32,
    completed_saves: AtomicU64,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<PlayerId, Value>,
    leases: HashMap<PlayerId, u64>,
    next_token: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail with `Unavailable`.
    pub fn fail_next_saves(&self, n: u32) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` saves fail with `RateLimited`.
    pub fn rate_limit_next_saves(&self, n: u32) {
        self.rate_limit_saves.store(n, Ordering::SeqCst);
    }

    /// Number of saves that reached the store successfully.
    pub fn completed_saves(&self) -> u64 {
        self.completed_saves.load(Ordering::SeqCst)
    }

    /// Current persisted blob for an identity, for test assertions.
    pub fn blob(&self, player: &PlayerId) -> Option<Value> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.blobs.get(player).cloned())
    }

    fn check_lease(inner: &Inner, handle: &StoreHandle) -> Result<()> {
        match inner.leases.get(handle.player()) {
            Some(token) if *token == handle.token() => Ok(()),
            _ => Err(StoreError::StaleHandle {
                player: handle.player().clone(),
            }),
        }
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn acquire(&self, player: &PlayerId) -> Result<StoreHandle> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.leases.contains_key(player) {
            return Err(StoreError::LockHeld {
                player: player.clone(),
            });
        }
        inner.next_token += 1;
        let token = inner.next_token;
        inner.leases.insert(player.clone(), token);
        Ok(StoreHandle::new(player.clone(), token))
    }

    async fn load(&self, handle: &StoreHandle) -> Result<Option<Value>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::check_lease(&inner, handle)?;
        Ok(inner.blobs.get(handle.player()).cloned())
    }

    async fn save(&self, handle: &StoreHandle, blob: &Value) -> Result<()> {
        if self
            .fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        if self
            .rate_limit_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::RateLimited);
        }

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        Self::check_lease(&inner, handle)?;
        inner.blobs.insert(handle.player().clone(), blob.clone());
        self.completed_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, handle: &StoreHandle) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        if inner.leases.get(handle.player()) == Some(&handle.token()) {
            inner.leases.remove(handle.player());
        }
        Ok(())
    }

    async fn load_offline(&self, player: &PlayerId) -> Result<Option<Value>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.blobs.get(player).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryStore::new();
        let player = PlayerId::from("42");

        let handle = store.acquire(&player).await.unwrap();
        assert_eq!(store.load(&handle).await.unwrap(), None);

        store.save(&handle, &json!({"Coins": 100})).await.unwrap();
        assert_eq!(store.load(&handle).await.unwrap(), Some(json!({"Coins": 100})));
    }

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let store = InMemoryStore::new();
        let player = PlayerId::from("42");

        let handle = store.acquire(&player).await.unwrap();
        let err = store.acquire(&player).await.unwrap_err();
        assert!(matches!(err, StoreError::LockHeld { .. }));

        store.release(&handle).await.unwrap();
        store.acquire(&player).await.unwrap();
    }

    #[tokio::test]
    async fn test_released_handle_is_stale() {
        let store = InMemoryStore::new();
        let player = PlayerId::from("42");

        let handle = store.acquire(&player).await.unwrap();
        store.release(&handle).await.unwrap();

        let err = store.save(&handle, &json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleHandle { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures_then_success() {
        let store = InMemoryStore::new();
        let player = PlayerId::from("42");
        let handle = store.acquire(&player).await.unwrap();

        store.fail_next_saves(2);
        assert!(store.save(&handle, &json!(1)).await.is_err());
        assert!(store.save(&handle, &json!(2)).await.is_err());
        store.save(&handle, &json!(3)).await.unwrap();

        assert_eq!(store.completed_saves(), 1);
        assert_eq!(store.blob(&player), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_offline_load_bypasses_lease() {
        let store = InMemoryStore::new();
        let player = PlayerId::from("42");
        let handle = store.acquire(&player).await.unwrap();
        store.save(&handle, &json!({"Coins": 7})).await.unwrap();

        // lease still held by `handle`
        assert_eq!(
            store.load_offline(&player).await.unwrap(),
            Some(json!({"Coins": 7}))
        );
    }
}
