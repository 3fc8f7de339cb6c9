//! File-based BackingStore implementation.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use state_core::PlayerId;

use super::error::{Result, StoreError};
use super::traits::{BackingStore, StoreHandle};

/// File-based implementation of [`BackingStore`].
///
/// Stores one JSON blob per identity as `{player}.json`, written through a
/// temp file and an atomic rename. The exclusivity primitive is a
/// `{player}.lock` file created with `create_new`; clearing leases left by
/// a crashed process is the deployment's sweeper job, not this adapter's.
pub struct FileStore {
    base_dir: PathBuf,
    next_token: AtomicU64,
}

impl FileStore {
    /// Create a new file-based store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(StoreError::Io)?;
        Ok(Self {
            base_dir,
            next_token: AtomicU64::new(0),
        })
    }

    fn blob_path(&self, player: &PlayerId) -> PathBuf {
        self.base_dir.join(format!("{}.json", player))
    }

    fn lock_path(&self, player: &PlayerId) -> PathBuf {
        self.base_dir.join(format!("{}.lock", player))
    }

    fn check_lease(&self, handle: &StoreHandle) -> Result<()> {
        let stale = || StoreError::StaleHandle {
            player: handle.player().clone(),
        };
        let content = fs::read_to_string(self.lock_path(handle.player())).map_err(|_| stale())?;
        if content.trim() == handle.token().to_string() {
            Ok(())
        } else {
            Err(stale())
        }
    }

    fn read_blob(&self, player: &PlayerId) -> Result<Option<Value>> {
        let path = self.blob_path(player);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(StoreError::Io)?;
        let blob =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(blob))
    }
}

#[async_trait]
impl BackingStore for FileStore {
    async fn acquire(&self, player: &PlayerId) -> Result<StoreHandle> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let lock_path = self.lock_path(player);

        let result = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path);
        match result {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::LockHeld {
                    player: player.clone(),
                });
            }
            Err(e) => return Err(StoreError::Io(e)),
        }
        fs::write(&lock_path, token.to_string()).map_err(StoreError::Io)?;

        tracing::debug!(%player, token, "acquired lease at {}", lock_path.display());
        Ok(StoreHandle::new(player.clone(), token))
    }

    async fn load(&self, handle: &StoreHandle) -> Result<Option<Value>> {
        self.check_lease(handle)?;
        self.read_blob(handle.player())
    }

    async fn save(&self, handle: &StoreHandle, blob: &Value) -> Result<()> {
        self.check_lease(handle)?;

        let path = self.blob_path(handle.player());
        let temp_path = path.with_extension("json.tmp");

        let bytes =
            serde_json::to_vec(blob).map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Write to temp file, then atomic rename
        fs::write(&temp_path, bytes).map_err(StoreError::Io)?;
        fs::rename(&temp_path, &path).map_err(StoreError::Io)?;

        tracing::debug!(player = %handle.player(), "saved blob to {}", path.display());
        Ok(())
    }

    async fn release(&self, handle: &StoreHandle) -> Result<()> {
        if self.check_lease(handle).is_ok() {
            fs::remove_file(self.lock_path(handle.player())).map_err(StoreError::Io)?;
            tracing::debug!(player = %handle.player(), "released lease");
        }
        Ok(())
    }

    async fn load_offline(&self, player: &PlayerId) -> Result<Option<Value>> {
        self.read_blob(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (_temp, store) = setup();
        let player = PlayerId::from("42");

        let handle = store.acquire(&player).await.unwrap();
        assert_eq!(store.load(&handle).await.unwrap(), None);

        let blob = json!({"Coins": 150, "Inventory": {"Weapons": []}});
        store.save(&handle, &blob).await.unwrap();
        assert_eq!(store.load(&handle).await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_lock_file_enforces_exclusivity() {
        let (_temp, store) = setup();
        let player = PlayerId::from("42");

        let handle = store.acquire(&player).await.unwrap();
        assert!(matches!(
            store.acquire(&player).await,
            Err(StoreError::LockHeld { .. })
        ));

        store.release(&handle).await.unwrap();
        let second = store.acquire(&player).await.unwrap();
        assert_ne!(second.token(), handle.token());
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_save() {
        let (_temp, store) = setup();
        let player = PlayerId::from("42");

        let first = store.acquire(&player).await.unwrap();
        store.release(&first).await.unwrap();
        let _second = store.acquire(&player).await.unwrap();

        assert!(matches!(
            store.save(&first, &json!({})).await,
            Err(StoreError::StaleHandle { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_load_ignores_lease() {
        let (_temp, store) = setup();
        let player = PlayerId::from("42");

        let handle = store.acquire(&player).await.unwrap();
        store.save(&handle, &json!({"Level": 3})).await.unwrap();

        assert_eq!(
            store.load_offline(&player).await.unwrap(),
            Some(json!({"Level": 3}))
        );
    }
}
