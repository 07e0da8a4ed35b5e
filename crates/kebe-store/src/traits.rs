//! Repository trait: the abstract interface for store persistence.
//!
//! The service layer is generic over this trait. Implementations include
//! SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use kebe_core::{AccountId, KeyId, Risk, SnapId};

use crate::error::Result;
use crate::models::{
    Account, Key, NewAccount, NewKey, NewSnapEntry, NewSnapRevision, NewSnapUpload, RowId,
    SnapBranch, SnapEntry, SnapMetadata, SnapRevision, SnapRisk, SnapTrack, SnapUpload,
};

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult<T> {
    /// The row was new.
    Inserted(T),
    /// An equivalent row already existed; it is returned unchanged.
    AlreadyExists(T),
}

impl<T> InsertResult<T> {
    pub fn into_inner(self) -> T {
        match self {
            InsertResult::Inserted(t) | InsertResult::AlreadyExists(t) => t,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertResult::Inserted(_))
    }
}

/// Async interface for store persistence.
///
/// Lookups return `Ok(None)` for missing or soft-deleted rows. Mutations of
/// rows that do not exist fail with [`StoreError::NotFound`]; uniqueness
/// violations fail with [`StoreError::AlreadyExists`] unless the method
/// returns an [`InsertResult`].
///
/// [`StoreError::NotFound`]: crate::StoreError::NotFound
/// [`StoreError::AlreadyExists`]: crate::StoreError::AlreadyExists
#[async_trait]
pub trait Repository: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Accounts and keys
    // ─────────────────────────────────────────────────────────────────────────

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn account_by_account_id(&self, account_id: &AccountId) -> Result<Option<Account>>;

    async fn account_by_id(&self, id: RowId) -> Result<Option<Account>>;

    async fn create_account(&self, account: &NewAccount) -> Result<Account>;

    async fn add_key(&self, key: &NewKey) -> Result<Key>;

    async fn key_by_id(&self, key_id: &KeyId) -> Result<Option<Key>>;

    async fn list_keys(&self, account: RowId) -> Result<Vec<Key>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Snaps
    // ─────────────────────────────────────────────────────────────────────────

    async fn snap_by_name(&self, name: &str) -> Result<Option<SnapEntry>>;

    async fn snap_by_snap_id(&self, snap_id: &SnapId) -> Result<Option<SnapEntry>>;

    async fn snap_by_id(&self, id: RowId) -> Result<Option<SnapEntry>>;

    async fn list_snaps_by_account(&self, account: RowId) -> Result<Vec<SnapEntry>>;

    async fn list_snaps(&self) -> Result<Vec<SnapEntry>>;

    /// Register a snap in one transaction: the entry, its placeholder
    /// revision, track `latest` and the four risks pointing at the
    /// placeholder.
    async fn create_snap_with_default_tracks(&self, snap: &NewSnapEntry) -> Result<SnapEntry>;

    async fn update_snap_metadata(&self, id: RowId, metadata: &SnapMetadata) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Revisions
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up by raw (hex) digest within one snap.
    async fn revision_by_digest(&self, snap: RowId, sha3_384: &str)
        -> Result<Option<SnapRevision>>;

    async fn revision_by_id(&self, id: RowId) -> Result<Option<SnapRevision>>;

    /// Look up by encoded digest across all snaps.
    async fn revision_by_encoded_digest(&self, encoded: &str) -> Result<Option<SnapRevision>>;

    /// Insert a revision. A revision with the same (snap, digest) is
    /// returned as `AlreadyExists`; the check and insert are atomic.
    async fn create_revision(
        &self,
        revision: &NewSnapRevision,
    ) -> Result<InsertResult<SnapRevision>>;

    async fn placeholder_revision(&self, snap: RowId) -> Result<Option<SnapRevision>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a track and its four risks, pointing at the placeholder.
    async fn add_track(&self, snap: RowId, name: &str) -> Result<SnapTrack>;

    async fn track_by_name(&self, snap: RowId, name: &str) -> Result<Option<SnapTrack>>;

    async fn list_tracks(&self, snap: RowId) -> Result<Vec<SnapTrack>>;

    async fn risk_by_track(&self, track: RowId, risk: Risk) -> Result<Option<SnapRisk>>;

    async fn list_risks(&self, track: RowId) -> Result<Vec<SnapRisk>>;

    async fn set_risk_revision(&self, risk: RowId, revision: RowId) -> Result<()>;

    /// Repoint every risk in `risks` at `revision`, all or nothing.
    async fn set_risk_revisions(&self, risks: &[RowId], revision: RowId) -> Result<()>;

    async fn add_branch(&self, risk: RowId, name: &str, revision: RowId) -> Result<SnapBranch>;

    async fn list_branches(&self, risk: RowId) -> Result<Vec<SnapBranch>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Uploads
    // ─────────────────────────────────────────────────────────────────────────

    async fn add_upload(&self, upload: &NewSnapUpload) -> Result<SnapUpload>;

    async fn upload_by_up_down_id(&self, up_down_id: &str) -> Result<Option<SnapUpload>>;

    /// Soft-delete an upload. Deleting a missing upload is not an error.
    async fn delete_upload(&self, up_down_id: &str) -> Result<()>;
}
