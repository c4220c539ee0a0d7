//! Shared primitives for all Rust crates in dlsgate.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across dlsgate crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string. Surrounding whitespace is trimmed.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Failures talking to the external authorization service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionStoreError {
    /// Network or TLS failure before a response was received.
    #[error("permission store unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-success status.
    #[error("permission store rejected the rule with status {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the service.
        status: u16,
        /// Raw response body, passed through verbatim.
        body: String,
    },

    /// The service answered with a body that could not be understood.
    #[error("permission store returned a malformed response: {0}")]
    Malformed(String),
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional write lost against a concurrent transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// External authorization service failure.
    #[error(transparent)]
    PermissionStore(#[from] PermissionStoreError),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when the error is a lost compare-and-set.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
