//! Unified error types surfaced by the runtime API.
//!
//! Wraps failures from path navigation, worker coordination, and the
//! backing store so clients can bubble them up with consistent context.

use std::time::Duration;

use thiserror::Error;

use state_core::{PathError, PlayerId};

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Path syntax, container-type, or index errors. Local and synchronous;
    /// the state tree is untouched.
    #[error(transparent)]
    Path(#[from] PathError),

    /// The session is not in `Ready`: never initialized, still starting,
    /// saving, or already closed.
    #[error("session for `{player}` is not ready")]
    SessionNotReady { player: PlayerId },

    /// The exclusivity lease could not be obtained or the load failed; the
    /// session never reached `Ready`.
    #[error("failed to acquire session for `{player}`")]
    SessionAcquisitionFailed {
        player: PlayerId,
        #[source]
        source: StoreError,
    },

    /// The backing store kept failing after the bounded retry budget during
    /// a forced or final flush.
    #[error("backing store unavailable after {attempts} attempt(s)")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The final teardown flush did not finish inside the bounded timeout.
    /// The lease is released regardless; data from the last cycle is at
    /// risk.
    #[error("final flush for `{player}` timed out after {timeout:?}")]
    FlushTimeout { player: PlayerId, timeout: Duration },

    #[error("no active session for `{player}`")]
    UnknownSession { player: PlayerId },

    #[error("session manager requires a backing store before building")]
    MissingStore,

    #[error("session worker join failed")]
    WorkerJoin(#[source] tokio::task::JoinError),
}
