//! Ops patch error types.

use thiserror::Error;

/// Errors raised while parsing or applying patch operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Invalid pointer '{pointer}': {reason}")]
    InvalidPointer { pointer: String, reason: String },

    #[error("Invalid operations: {0}")]
    InvalidOperations(String),

    #[error("Path '{path}' not found at token '{token}'")]
    PathNotFound { path: String, token: String },

    #[error("Expected {expected} at '{path}' for token '{token}', found {found}")]
    TypeMismatch {
        path: String,
        token: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A patch operation failed; carries its position in the ops file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Operation #{index} ({verb} {path}) failed: {source}")]
pub struct ApplyError {
    pub index: usize,
    pub verb: &'static str,
    pub path: String,
    #[source]
    pub source: PatchError,
}
