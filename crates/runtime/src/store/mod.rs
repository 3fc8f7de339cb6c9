//! Backing-store adapters for durable per-identity blobs.
//!
//! [`BackingStore`] is the seam to the external durable store; the in-memory
//! adapter backs tests and local runs, the file adapter backs single-host
//! deployments.

mod error;
mod file;
mod memory;
mod traits;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use traits::{BackingStore, StoreHandle};
