//! Error types for kebe core.

use thiserror::Error;

/// Errors from the low-level primitives (keys, digests, encodings).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors raised while decoding, signing or verifying assertions.
#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("malformed assertion: {0}")]
    Malformed(String),

    #[error("missing header: {0}")]
    MissingHeader(String),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("unknown assertion type: {0}")]
    UnknownType(String),

    #[error("expected {expected} assertion, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: String,
    },

    #[error("no private key for signing key {0}")]
    SigningKeyUnavailable(String),

    #[error("signature verification failed")]
    SignatureFailed,

    #[error("signing key {0} is not attested by any account-key assertion")]
    UnknownSigningKey(String),

    #[error("signing key {key_id} belongs to {owner}, not to authority {authority_id}")]
    AuthorityMismatch {
        key_id: String,
        owner: String,
        authority_id: String,
    },

    #[error("assertion chain is deeper than {0} links")]
    ChainTooDeep(usize),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AssertionError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from parsing channel references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel name is empty")]
    Empty,

    #[error("channel {0:?} has an empty segment")]
    EmptySegment(String),

    #[error("unknown risk {risk:?} in channel {channel:?}")]
    UnknownRisk { channel: String, risk: String },

    #[error("branches not supported yet: {0}")]
    BranchesUnsupported(String),

    #[error("channel {0:?} has too many segments")]
    TooManySegments(String),
}
