//! # kebe core
//!
//! Pure primitives for the kebe snap store: content digests, signed
//! assertions and channel references.
//!
//! This crate contains no I/O, no storage, no networking. Callers gather
//! facts from the repository and hand them in; this crate only produces or
//! checks documents.
//!
//! ## Key Types
//!
//! - [`SnapDigest`] - raw and encoded SHA3-384 of a snap plus its size
//! - [`Assertion`] - typed view of the five assertion kinds
//! - [`SignedDocument`] - headers, optional body and signature on the wire
//! - [`TrustChain`] - verifies documents up to the trust anchor
//! - [`ChannelRef`] - parsed `track/risk[/branch]` reference

pub mod assertion;
pub mod channel;
pub mod crypto;
pub mod digest;
pub mod document;
pub mod error;
pub mod signing;
pub mod trust;
pub mod types;

pub use assertion::{
    Assertion, AssertionType, AccountAssertion, AccountKeyAssertion, SerialAssertion,
    SnapDeclarationAssertion, SnapRevisionAssertion,
};
pub use channel::{parse_channel, split_channel_list, ChannelRef, Risk, DEFAULT_TRACK};
pub use crypto::{Keypair, PublicKey, Signature};
pub use digest::{digest, digest_reader, Sha3_384Hash, SnapDigest, StreamingDigest};
pub use document::{Headers, SignedDocument, MEDIA_TYPE};
pub use error::{AssertionError, ChannelError, CoreError};
pub use signing::{sign_assertion, AssertionSigner, KeypairManager, MemoryKeypairManager};
pub use trust::{TrustAnchor, TrustChain};
pub use types::{AccountId, Confinement, KeyId, SnapId, SnapType, Validation};
