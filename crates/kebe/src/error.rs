//! Error types for the store façade.

use kebe_auth::AuthError;
use kebe_core::{AssertionError, ChannelError};
use kebe_store::StoreError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum KebeError {
    /// Capability rejected. The inner cause is for logs only.
    #[error("unauthorized")]
    Unauthorized(#[source] AuthError),

    /// Track or risk does not exist for the package.
    #[error("unknown channel {channel} for {package}")]
    ChannelUnknown { package: String, channel: String },

    /// A channel points at a revision that no longer exists.
    #[error("revision {0} not found")]
    RevisionNotFound(i64),

    #[error("branches not supported: {0}")]
    BranchesUnsupported(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(#[source] ChannelError),

    #[error("assertion error: {0}")]
    AssertionInvalid(#[from] AssertionError),

    #[error("snap not found: {0}")]
    SnapNotFound(String),

    #[error("upload not found: {0}")]
    UploadNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<ChannelError> for KebeError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::BranchesUnsupported(channel) => KebeError::BranchesUnsupported(channel),
            other => KebeError::InvalidChannel(other),
        }
    }
}

impl KebeError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KebeError::Store(e) if e.is_retryable())
    }

    pub fn public_code(&self) -> PublicErrorCode {
        match self {
            KebeError::Unauthorized(_) => PublicErrorCode::Unauthorized,
            KebeError::ChannelUnknown { .. }
            | KebeError::RevisionNotFound(_)
            | KebeError::SnapNotFound(_)
            | KebeError::UploadNotFound(_)
            | KebeError::NotFound(_) => PublicErrorCode::NotFound,
            KebeError::InvalidChannel(_) | KebeError::InvalidRequest(_) => {
                PublicErrorCode::InvalidInput
            }
            KebeError::BranchesUnsupported(_) | KebeError::AlreadyRegistered(_) => {
                PublicErrorCode::FailedPrecondition
            }
            KebeError::AssertionInvalid(_) => PublicErrorCode::Internal,
            KebeError::Store(e) if e.is_retryable() => PublicErrorCode::Unavailable,
            KebeError::Store(StoreError::NotFound(_) | StoreError::BlobNotFound { .. }) => {
                PublicErrorCode::NotFound
            }
            KebeError::Store(StoreError::AlreadyExists(_)) => PublicErrorCode::FailedPrecondition,
            KebeError::Store(_) => PublicErrorCode::Internal,
        }
    }
}

/// Error codes safe to hand to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicErrorCode {
    InvalidInput,
    Unauthorized,
    NotFound,
    FailedPrecondition,
    Unavailable,
    Internal,
}

impl PublicErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "resource not found",
            Self::FailedPrecondition => "operation not allowed in current state",
            Self::Unavailable => "service unavailable",
            Self::Internal => "internal error",
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, KebeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_hides_cause() {
        let err = KebeError::Unauthorized(AuthError::MissingEmailCaveat);
        assert_eq!(err.to_string(), "unauthorized");
        assert_eq!(err.public_code().as_str(), "UNAUTHORIZED");
        assert_eq!(err.public_code().message(), "unauthorized");
    }

    #[test]
    fn test_channel_errors_map() {
        let err: KebeError = ChannelError::BranchesUnsupported("a/b/c".into()).into();
        assert!(matches!(err, KebeError::BranchesUnsupported(_)));
        assert_eq!(err.public_code(), PublicErrorCode::FailedPrecondition);

        let err: KebeError = ChannelError::TooManySegments("a/b/c/d".into()).into();
        assert!(matches!(err, KebeError::InvalidChannel(_)));
        assert_eq!(err.public_code(), PublicErrorCode::InvalidInput);
    }

    #[test]
    fn test_retryable() {
        let err = KebeError::Store(StoreError::TaskFailed("join".into()));
        assert!(err.is_retryable());
        assert_eq!(err.public_code(), PublicErrorCode::Unavailable);
        assert!(!KebeError::SnapNotFound("x".into()).is_retryable());
    }
}
