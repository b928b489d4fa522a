//! Error type definitions for the import pipeline
//!
//! The taxonomy distinguishes caller mistakes (bad input, unknown ids,
//! operations illegal for the current job state) from transient I/O
//! failures inside the asynchronous processing loop, which are recorded on
//! the job rather than propagated.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad upload or malformed rule/mapping/configuration payload
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Unknown job/rule/mapping id
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Operation not legal for the current job status
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Storage or downstream-write failure; caught at the job boundary
    /// during processing and converted to `processing_failed`
    #[error("Transient I/O error: {message}")]
    TransientIo { message: String },

    /// Rule & mapping store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization failures
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn transient_io<S: Into<String>>(message: S) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::TransientIo {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        Self::InvalidInput {
            message: format!("CSV parse error: {}", err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
