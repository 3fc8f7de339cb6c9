//! Pure data layer for per-session nested state.
//!
//! `state-core` defines the path grammar, the navigation interpreter over
//! `serde_json::Value` trees, and the change-record types shared between the
//! runtime and offline tools. Everything here is synchronous and free of
//! hidden state; all mutation flows through [`resolver`], and supporting
//! crates depend on the types re-exported here.
pub mod error;
pub mod numeric;
pub mod path;
pub mod record;
pub mod resolver;
pub mod types;

pub use error::PathError;
pub use path::{Path, PathStep};
pub use record::ChangeRecord;
pub use types::PlayerId;
