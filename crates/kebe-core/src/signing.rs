//! Signing backend for assertions.

use std::collections::HashMap;

use crate::assertion::Assertion;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::document::SignedDocument;
use crate::error::AssertionError;
use crate::types::KeyId;

/// Resolves key ids to signing capability.
///
/// The store keeps its private keys in a [`MemoryKeypairManager`] loaded at
/// start-up; an HSM-backed manager would implement the same trait.
pub trait KeypairManager: Send + Sync {
    fn public_key(&self, key_id: &KeyId) -> Option<PublicKey>;

    fn sign(&self, key_id: &KeyId, message: &[u8]) -> Result<Signature, AssertionError>;
}

/// Keypairs held in process memory, indexed by key id.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeypairManager {
    keys: HashMap<KeyId, Keypair>,
}

impl MemoryKeypairManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keypair and return its key id.
    pub fn import(&mut self, keypair: Keypair) -> KeyId {
        let key_id = keypair.key_id();
        self.keys.insert(key_id.clone(), keypair);
        key_id
    }

    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.keys.contains_key(key_id)
    }
}

impl KeypairManager for MemoryKeypairManager {
    fn public_key(&self, key_id: &KeyId) -> Option<PublicKey> {
        self.keys.get(key_id).map(Keypair::public_key)
    }

    fn sign(&self, key_id: &KeyId, message: &[u8]) -> Result<Signature, AssertionError> {
        self.keys
            .get(key_id)
            .map(|kp| kp.sign(message))
            .ok_or_else(|| AssertionError::SigningKeyUnavailable(key_id.to_string()))
    }
}

/// Sign an assertion with the key named by `key_id`.
pub fn sign_assertion<M: KeypairManager + ?Sized>(
    manager: &M,
    assertion: &Assertion,
    key_id: &KeyId,
) -> Result<SignedDocument, AssertionError> {
    let (headers, body) = assertion.to_parts();
    SignedDocument::assemble(headers, body, key_id, |content| {
        manager.sign(key_id, content)
    })
}

/// Anything that can turn a typed assertion into a signed document.
pub trait AssertionSigner: Send + Sync {
    fn sign(&self, assertion: &Assertion, key_id: &KeyId) -> Result<SignedDocument, AssertionError>;
}

impl<M: KeypairManager> AssertionSigner for M {
    fn sign(&self, assertion: &Assertion, key_id: &KeyId) -> Result<SignedDocument, AssertionError> {
        sign_assertion(self, assertion, key_id)
    }
}
