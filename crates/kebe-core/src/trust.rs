//! Chain verification up to the trust anchor.
//!
//! A document verifies when its signature checks out under the key named
//! by `sign-key-sha3-384`, and that key is either a trust anchor or is
//! attested by an account-key assertion that itself verifies. The
//! account-key's `account-id` must equal the `authority-id` of the
//! document it vouches for.
//!
//! Timestamps, `since`/`until` windows and revocation are not consulted.

use std::collections::HashMap;

use crate::assertion::AccountKeyAssertion;
use crate::crypto::PublicKey;
use crate::document::SignedDocument;
use crate::error::AssertionError;
use crate::types::{AccountId, KeyId};

/// Links followed before giving up; also breaks attestation cycles.
pub const MAX_CHAIN_DEPTH: usize = 8;

/// A root key provisioned out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    pub authority_id: AccountId,
    pub public_key: PublicKey,
}

/// Trust anchors plus the account-key assertions that extend them.
#[derive(Debug, Clone, Default)]
pub struct TrustChain {
    anchors: HashMap<KeyId, TrustAnchor>,
    account_keys: HashMap<KeyId, SignedDocument>,
}

impl TrustChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_anchor(&mut self, authority_id: AccountId, public_key: PublicKey) -> KeyId {
        let key_id = public_key.key_id();
        self.anchors.insert(
            key_id.clone(),
            TrustAnchor {
                authority_id,
                public_key,
            },
        );
        key_id
    }

    /// Register an account-key assertion. It is checked when a document
    /// signed by its key is verified, so insertion order does not matter.
    pub fn add_account_key(&mut self, doc: SignedDocument) -> Result<KeyId, AssertionError> {
        let key = AccountKeyAssertion::from_document(&doc)?;
        let key_id = key.public_key_id();
        self.account_keys.insert(key_id.clone(), doc);
        Ok(key_id)
    }

    pub fn is_anchor(&self, key_id: &KeyId) -> bool {
        self.anchors.contains_key(key_id)
    }

    pub fn verify(&self, doc: &SignedDocument) -> Result<(), AssertionError> {
        self.verify_link(doc, 0)
    }

    pub fn is_valid(&self, doc: &SignedDocument) -> bool {
        self.verify(doc).is_ok()
    }

    fn verify_link(&self, doc: &SignedDocument, depth: usize) -> Result<(), AssertionError> {
        if depth >= MAX_CHAIN_DEPTH {
            return Err(AssertionError::ChainTooDeep(MAX_CHAIN_DEPTH));
        }

        let key_id = doc.sign_key_id()?;
        let authority_id = doc.authority_id()?;

        if let Some(anchor) = self.anchors.get(&key_id) {
            if anchor.authority_id.as_str() != authority_id {
                return Err(AssertionError::AuthorityMismatch {
                    key_id: key_id.to_string(),
                    owner: anchor.authority_id.to_string(),
                    authority_id: authority_id.to_string(),
                });
            }
            return doc.verify_signature(&anchor.public_key);
        }

        let key_doc = self
            .account_keys
            .get(&key_id)
            .ok_or_else(|| AssertionError::UnknownSigningKey(key_id.to_string()))?;
        let key = AccountKeyAssertion::from_document(key_doc)?;

        if key.account_id.as_str() != authority_id {
            return Err(AssertionError::AuthorityMismatch {
                key_id: key_id.to_string(),
                owner: key.account_id.to_string(),
                authority_id: authority_id.to_string(),
            });
        }

        doc.verify_signature(&key.public_key)?;
        self.verify_link(key_doc, depth + 1)
    }
}
