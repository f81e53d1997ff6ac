//! Error types for the notification pipeline.

use crate::dispatch::DeliveryErrorKind;
use crate::types::UserId;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    #[error("invalid collection path: {0}")]
    InvalidPath(String),

    #[error("incomplete event: missing field {field:?}")]
    IncompleteEvent { field: String },

    #[error("delivery failed ({kind}): {message}")]
    Delivery {
        kind: DeliveryErrorKind,
        message: String,
    },
}

impl PipelineError {
    /// Convenience constructor for the build-time failure.
    pub fn incomplete(field: impl Into<String>) -> Self {
        PipelineError::IncompleteEvent {
            field: field.into(),
        }
    }

    /// Convenience constructor for dispatch-time failures.
    pub fn delivery(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        PipelineError::Delivery {
            kind,
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
