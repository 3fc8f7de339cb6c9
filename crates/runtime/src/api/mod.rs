//! Public API surface of the runtime crate.
//!
//! This module gathers the types exposed to consumers so the other layers
//! can stay focused on orchestration, workers, or store adapters.

pub mod errors;
pub mod handle;

pub use errors::{Result, RuntimeError};
pub use handle::SessionHandle;
