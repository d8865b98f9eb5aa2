//! Task-level error model.

use thiserror::Error;

/// A task (or an intake request shaped into one) failed validation.
///
/// Validation failures are never retried; they are reported straight back to
/// whoever tried to enqueue the task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was empty (or whitespace only).
    #[error("{field} is required")]
    Required { field: &'static str },

    /// A field exceeded its maximum length (in characters).
    #[error("{field} is too long (max {max} characters)")]
    TooLong { field: &'static str, max: usize },

    /// The recipient is not a single, syntactically valid address.
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
}

impl ValidationError {
    pub fn required(field: &'static str) -> Self {
        Self::Required { field }
    }

    pub fn too_long(field: &'static str, max: usize) -> Self {
        Self::TooLong { field, max }
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Wire name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Required { field } | Self::TooLong { field, .. } => field,
            Self::InvalidAddress(_) => "to",
        }
    }
}

/// A queue entry could not be decoded into an [`EmailTask`](crate::EmailTask).
///
/// This means corrupt data or a schema mismatch between producer and consumer.
/// The entry is dropped; putting it back would make it fail forever.
#[derive(Debug, Error)]
#[error("task deserialization error: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);
