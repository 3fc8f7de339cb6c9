//! Remote observer transport contract.
//!
//! The transport is an external collaborator: an ordered, reliable,
//! at-least-once message channel to the process observing one session's
//! data. Receivers treat redelivery of a subtree as last-write-wins.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use state_core::PlayerId;

/// Delivery failure reported by an observer channel.
#[derive(Debug, Error)]
#[error("observer channel error: {0}")]
pub struct ObserverError(pub String);

/// Channel bound to exactly one session's remote observer.
#[async_trait]
pub trait ObserverChannel: Send + Sync {
    /// Deliver the full new subtree rooted at `root_key`.
    ///
    /// Delivery is FIFO per session and at-least-once; the subtree value is
    /// the complete replacement for everything under `root_key`.
    async fn send(&self, root_key: &str, subtree: &Value) -> Result<(), ObserverError>;
}

/// Factory binding observer channels to sessions.
#[async_trait]
pub trait ObserverTransport: Send + Sync {
    async fn bind(&self, player: &PlayerId) -> Arc<dyn ObserverChannel>;
}

/// Transport for sessions with no remote observer.
#[derive(Debug, Default)]
pub struct NullTransport;

struct NullChannel;

#[async_trait]
impl ObserverChannel for NullChannel {
    async fn send(&self, _root_key: &str, _subtree: &Value) -> Result<(), ObserverError> {
        Ok(())
    }
}

#[async_trait]
impl ObserverTransport for NullTransport {
    async fn bind(&self, _player: &PlayerId) -> Arc<dyn ObserverChannel> {
        Arc::new(NullChannel)
    }
}
