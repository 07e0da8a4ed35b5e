//! Error types for capability authorization.

use thiserror::Error;

/// Reasons a capability is rejected or cannot be minted.
///
/// Callers outside this crate should collapse every variant into a single
/// "unauthorized" outcome; the distinctions exist for logs and tests.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed authorization header: {0}")]
    MalformedHeader(String),

    #[error("malformed macaroon: {0}")]
    MalformedToken(String),

    #[error("macaroon verification failed: {0}")]
    Verification(String),

    #[error("discharge carries no email caveat")]
    MissingEmailCaveat,

    #[error("malformed email caveat: {0}")]
    MalformedEmailCaveat(String),

    #[error("no account for {0}")]
    UnknownAccount(String),

    #[error("cannot mint macaroon: {0}")]
    Minting(String),

    #[error("identity provider rejected credentials: {0}")]
    Identity(#[from] IdentityError),
}

/// Errors from an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email {0} is not verified")]
    EmailNotVerified(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;
