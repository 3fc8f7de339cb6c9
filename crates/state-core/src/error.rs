//! Error types raised by path parsing and tree navigation.

use thiserror::Error;

/// Errors surfaced by [`crate::path`] and [`crate::resolver`].
///
/// All variants are local and synchronous; a failed operation leaves the
/// tree exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("type mismatch at `{at}`: expected {expected}")]
    TypeMismatch { at: String, expected: &'static str },

    #[error("index {index} out of range at `{at}` (len {len})")]
    IndexOutOfRange {
        at: String,
        index: usize,
        len: usize,
    },
}

pub type Result<T> = std::result::Result<T, PathError>;
