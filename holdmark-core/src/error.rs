//! Validation errors
//!
//! Everything in here is returned synchronously, before any store I/O happens,
//! and is fixable by correcting the input.

/// Errors produced while validating abstraction types, ranges, job ids,
/// filesystem selectors and whole queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbstractionError {
    #[error("unknown abstraction type {0:?}")]
    UnknownType(String),

    #[error("invalid abstraction type #{index} {value:?}: unknown abstraction type")]
    InvalidTypeInList { index: usize, value: String },

    #[error("{bound}: CreateTXG must be non-zero")]
    ZeroBound { bound: &'static str },

    #[error("specified range {range} is semantically invalid: {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("FS invalid: {name:?}: {reason}")]
    InvalidFilesystem { name: String, reason: String },

    #[error("invalid filesystem filter rule {rule:?}: {reason}")]
    InvalidFilterRule { rule: String, reason: String },

    #[error("invalid job id {id:?}: {reason}")]
    InvalidJobId { id: String, reason: String },

    #[error("Concurrency must be >= 1 and <= {max}, got {got}")]
    InvalidConcurrency { got: usize, max: usize },
}
