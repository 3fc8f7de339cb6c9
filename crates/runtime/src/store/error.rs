//! Error types raised by backing-store adapters.

use thiserror::Error;

use state_core::PlayerId;

/// Errors surfaced by [`crate::store::BackingStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("exclusivity lease for `{player}` is held by another session")]
    LockHeld { player: PlayerId },

    #[error("stale or released store handle for `{player}`")]
    StaleHandle { player: PlayerId },

    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("write rate limit exceeded")]
    RateLimited,

    #[error("store lock was poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether a failed save may succeed on a later attempt.
    ///
    /// Lease conflicts and stale handles are permanent for the requesting
    /// session; availability and I/O hiccups are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::LockHeld { .. } | Self::StaleHandle { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
