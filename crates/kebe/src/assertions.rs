//! Building and signing the assertions the store serves.
//!
//! Assertions are not persisted; they are rebuilt from repository rows and
//! signed with the root key whenever they are requested.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use kebe_core::assertion::parse_time_str;
use kebe_core::{
    sign_assertion, AccountAssertion, AccountKeyAssertion, Assertion, AssertionError, PublicKey,
    SignedDocument, SnapDeclarationAssertion, SnapRevisionAssertion, Sha3_384Hash, Validation,
    MEDIA_TYPE,
};
use kebe_store::{Account, Key, SnapEntry, SnapRevision};

use crate::context::StoreContext;
use crate::error::{KebeError, Result};

/// Series every snap is declared under.
pub const SERIES: &str = "16";

/// Start of the validity window given to account keys.
const KEY_SINCE: &str = "2015-11-20T15:04:00Z";
/// End of the validity window given to account keys.
const KEY_UNTIL: &str = "2500-11-20T15:04:00Z";

/// A signed assertion ready to hand to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAssertion {
    pub media_type: &'static str,
    pub bytes: Bytes,
}

impl EncodedAssertion {
    pub fn from_document(doc: &SignedDocument) -> Self {
        Self {
            media_type: MEDIA_TYPE,
            bytes: Bytes::from(doc.encode()),
        }
    }

    /// Decode the bytes back into a document.
    pub fn document(&self) -> std::result::Result<SignedDocument, AssertionError> {
        SignedDocument::decode(&self.bytes)
    }
}

pub fn key_window() -> std::result::Result<(DateTime<Utc>, DateTime<Utc>), AssertionError> {
    Ok((
        parse_time_str("since", KEY_SINCE)?,
        parse_time_str("until", KEY_UNTIL)?,
    ))
}

pub fn account(ctx: &StoreContext, account: &Account, validation: Validation) -> Assertion {
    Assertion::Account(AccountAssertion {
        authority_id: ctx.authority_id().clone(),
        account_id: account.account_id.clone(),
        username: account.username.clone(),
        display_name: Some(account.display_name.clone()).filter(|n| !n.is_empty()),
        validation,
        timestamp: Utc::now(),
    })
}

/// Validation level for an account: store-owned accounts are certified.
pub fn validation_for(ctx: &StoreContext, account: &Account) -> Validation {
    if ctx.is_store_account(&account.account_id) {
        Validation::Certified
    } else {
        Validation::Verified
    }
}

pub fn account_key(ctx: &StoreContext, account: &Account, key: &Key) -> Result<Assertion> {
    let public_key = PublicKey::decode(&key.encoded_public_key)
        .map_err(|e| KebeError::AssertionInvalid(e.into()))?;
    let (since, until) = key_window()?;
    Ok(Assertion::AccountKey(AccountKeyAssertion {
        authority_id: ctx.authority_id().clone(),
        account_id: account.account_id.clone(),
        name: key.name.clone(),
        since,
        until,
        public_key,
    }))
}

pub fn snap_declaration(ctx: &StoreContext, snap: &SnapEntry, publisher: &Account) -> Assertion {
    Assertion::SnapDeclaration(SnapDeclarationAssertion {
        authority_id: ctx.authority_id().clone(),
        series: SERIES.to_string(),
        snap_id: snap.snap_id.clone(),
        publisher_id: publisher.account_id.clone(),
        snap_name: snap.name.clone(),
        revision: 0,
        timestamp: Utc::now(),
    })
}

pub fn snap_revision(
    ctx: &StoreContext,
    snap: &SnapEntry,
    revision: &SnapRevision,
    developer: &Account,
) -> Result<Assertion> {
    let digest = Sha3_384Hash::from_hex(&revision.sha3_384)
        .map_err(|e| KebeError::AssertionInvalid(e.into()))?;
    Ok(Assertion::SnapRevision(SnapRevisionAssertion {
        authority_id: ctx.authority_id().clone(),
        snap_sha3_384: digest,
        snap_id: snap.snap_id.clone(),
        snap_size: revision.size,
        snap_revision: revision.id as u64,
        developer_id: developer.account_id.clone(),
        timestamp: Utc::now(),
    }))
}

/// Sign with the root key and encode.
pub fn encode(ctx: &StoreContext, assertion: &Assertion) -> Result<EncodedAssertion> {
    let doc = sign_assertion(ctx.keys(), assertion, ctx.root_key_id())?;
    let bytes = doc.encode();
    tracing::trace!(
        kind = assertion.assertion_type().as_str(),
        size = bytes.len(),
        "encoded assertion"
    );
    Ok(EncodedAssertion {
        media_type: MEDIA_TYPE,
        bytes: Bytes::from(bytes),
    })
}
