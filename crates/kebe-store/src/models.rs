//! Persisted entities.
//!
//! Rows reference each other by [`RowId`]. Every row carries an [`Audit`]
//! block; soft-deleted rows never come back from a lookup.

use serde::{Deserialize, Serialize};

use kebe_core::{AccountId, Confinement, KeyId, Risk, SnapId, SnapType};

/// Surrogate primary key.
pub type RowId = i64;

/// Creation, update and soft-delete stamps (Unix ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Audit {
    pub fn new(now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: RowId,
    pub account_id: AccountId,
    pub username: String,
    pub display_name: String,
    /// Identity used for authentication; unique.
    pub email: String,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub account_id: AccountId,
    pub username: String,
    pub display_name: String,
    pub email: String,
}

/// A publisher signing key. Bound to its account only through a signed
/// account-key assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: RowId,
    pub account: RowId,
    pub name: String,
    pub sha3_384: KeyId,
    pub encoded_public_key: String,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKey {
    pub account: RowId,
    pub name: String,
    pub sha3_384: KeyId,
    pub encoded_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapEntry {
    pub id: RowId,
    pub name: String,
    pub snap_id: SnapId,
    pub account: RowId,
    pub snap_type: SnapType,
    pub confinement: Option<Confinement>,
    pub base: Option<String>,
    pub audit: Audit,
}

impl SnapEntry {
    pub fn metadata(&self) -> SnapMetadata {
        SnapMetadata {
            snap_type: self.snap_type,
            confinement: self.confinement,
            base: self.base.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnapEntry {
    pub name: String,
    pub snap_id: SnapId,
    pub account: RowId,
    pub snap_type: SnapType,
}

/// The fields of a snap entry that uploads may refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapMetadata {
    pub snap_type: SnapType,
    pub confinement: Option<Confinement>,
    pub base: Option<String>,
}

/// One immutable uploaded binary. Its row id is the revision number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapRevision {
    pub id: RowId,
    pub snap_entry: RowId,
    /// Blob key in the permanent bucket.
    pub filename: String,
    /// Lowercase hex SHA3-384; empty for the placeholder.
    pub sha3_384: String,
    pub sha3_384_encoded: String,
    pub size: u64,
    pub audit: Audit,
}

impl SnapRevision {
    /// The revision every fresh risk points at before the first release.
    pub fn is_placeholder(&self) -> bool {
        self.sha3_384.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnapRevision {
    pub snap_entry: RowId,
    pub filename: String,
    pub sha3_384: String,
    pub sha3_384_encoded: String,
    pub size: u64,
}

impl NewSnapRevision {
    pub(crate) fn placeholder(snap_entry: RowId) -> Self {
        Self {
            snap_entry,
            filename: String::new(),
            sha3_384: String::new(),
            sha3_384_encoded: String::new(),
            size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapTrack {
    pub id: RowId,
    pub snap_entry: RowId,
    pub name: String,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapRisk {
    pub id: RowId,
    pub track: RowId,
    pub risk: Risk,
    /// Currently released revision.
    pub revision: RowId,
    pub audit: Audit,
}

/// Sub-channel under a risk. Persisted, never resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapBranch {
    pub id: RowId,
    pub risk: RowId,
    pub name: String,
    pub revision: RowId,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapUpload {
    pub id: RowId,
    pub up_down_id: String,
    pub snap_entry: RowId,
    pub filesize: u64,
    /// Channels to release to once processed, in request order.
    pub channels: Vec<String>,
    pub audit: Audit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnapUpload {
    pub up_down_id: String,
    pub snap_entry: RowId,
    pub filesize: u64,
    pub channels: Vec<String>,
}
