//! In-memory implementation of the Repository trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use kebe_core::{AccountId, KeyId, Risk, SnapId, DEFAULT_TRACK};

use crate::error::{Result, StoreError};
use crate::models::{
    Account, Audit, Key, NewAccount, NewKey, NewSnapEntry, NewSnapRevision, NewSnapUpload, RowId,
    SnapBranch, SnapEntry, SnapMetadata, SnapRevision, SnapRisk, SnapTrack, SnapUpload,
};
use crate::now_millis;
use crate::traits::{InsertResult, Repository};

/// In-memory repository.
///
/// All data is lost when the repository is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: RowId,
    accounts: BTreeMap<RowId, Account>,
    keys: BTreeMap<RowId, Key>,
    snaps: BTreeMap<RowId, SnapEntry>,
    revisions: BTreeMap<RowId, SnapRevision>,
    tracks: BTreeMap<RowId, SnapTrack>,
    risks: BTreeMap<RowId, SnapRisk>,
    branches: BTreeMap<RowId, SnapBranch>,
    uploads: BTreeMap<RowId, SnapUpload>,
}

impl Inner {
    fn next_id(&mut self) -> RowId {
        self.next_id += 1;
        self.next_id
    }

    fn live<T, F>(table: &BTreeMap<RowId, T>, audit: fn(&T) -> &Audit, pred: F) -> Option<T>
    where
        T: Clone,
        F: Fn(&T) -> bool,
    {
        table
            .values()
            .find(|row| !audit(row).is_deleted() && pred(row))
            .cloned()
    }

    fn require_snap(&self, id: RowId) -> Result<()> {
        match self.snaps.get(&id) {
            Some(s) if !s.audit.is_deleted() => Ok(()),
            _ => Err(StoreError::NotFound(format!("snap entry {}", id))),
        }
    }

    fn require_revision(&self, id: RowId) -> Result<()> {
        match self.revisions.get(&id) {
            Some(r) if !r.audit.is_deleted() => Ok(()),
            _ => Err(StoreError::NotFound(format!("revision {}", id))),
        }
    }

    fn insert_revision(&mut self, rev: &NewSnapRevision, now: i64) -> SnapRevision {
        let row = SnapRevision {
            id: self.next_id(),
            snap_entry: rev.snap_entry,
            filename: rev.filename.clone(),
            sha3_384: rev.sha3_384.clone(),
            sha3_384_encoded: rev.sha3_384_encoded.clone(),
            size: rev.size,
            audit: Audit::new(now),
        };
        self.revisions.insert(row.id, row.clone());
        row
    }

    fn insert_track(&mut self, snap: RowId, name: &str, placeholder: RowId, now: i64) -> SnapTrack {
        let track = SnapTrack {
            id: self.next_id(),
            snap_entry: snap,
            name: name.to_string(),
            audit: Audit::new(now),
        };
        self.tracks.insert(track.id, track.clone());
        for risk in Risk::ALL {
            let row = SnapRisk {
                id: self.next_id(),
                track: track.id,
                risk,
                revision: placeholder,
                audit: Audit::new(now),
            };
            self.risks.insert(row.id, row);
        }
        track
    }
}

impl MemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(StoreError::poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(StoreError::poisoned)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.accounts, |a| &a.audit, |a| a.email == email))
    }

    async fn account_by_account_id(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.accounts, |a| &a.audit, |a| &a.account_id == account_id))
    }

    async fn account_by_id(&self, id: RowId) -> Result<Option<Account>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.accounts, |a| &a.audit, |a| a.id == id))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let mut inner = self.write()?;
        let clash = inner.accounts.values().any(|a| {
            a.account_id == account.account_id
                || a.username == account.username
                || a.email == account.email
        });
        if clash {
            return Err(StoreError::AlreadyExists(format!(
                "account {}",
                account.account_id
            )));
        }

        let row = Account {
            id: inner.next_id(),
            account_id: account.account_id.clone(),
            username: account.username.clone(),
            display_name: account.display_name.clone(),
            email: account.email.clone(),
            audit: Audit::new(now_millis()),
        };
        inner.accounts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn add_key(&self, key: &NewKey) -> Result<Key> {
        let mut inner = self.write()?;
        if !inner.accounts.contains_key(&key.account) {
            return Err(StoreError::NotFound(format!("account {}", key.account)));
        }
        if inner.keys.values().any(|k| k.sha3_384 == key.sha3_384) {
            return Err(StoreError::AlreadyExists(format!("key {}", key.sha3_384)));
        }

        let row = Key {
            id: inner.next_id(),
            account: key.account,
            name: key.name.clone(),
            sha3_384: key.sha3_384.clone(),
            encoded_public_key: key.encoded_public_key.clone(),
            audit: Audit::new(now_millis()),
        };
        inner.keys.insert(row.id, row.clone());
        Ok(row)
    }

    async fn key_by_id(&self, key_id: &KeyId) -> Result<Option<Key>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.keys, |k| &k.audit, |k| &k.sha3_384 == key_id))
    }

    async fn list_keys(&self, account: RowId) -> Result<Vec<Key>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .values()
            .filter(|k| k.account == account && !k.audit.is_deleted())
            .cloned()
            .collect())
    }

    async fn snap_by_name(&self, name: &str) -> Result<Option<SnapEntry>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.snaps, |s| &s.audit, |s| s.name == name))
    }

    async fn snap_by_snap_id(&self, snap_id: &SnapId) -> Result<Option<SnapEntry>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.snaps, |s| &s.audit, |s| &s.snap_id == snap_id))
    }

    async fn snap_by_id(&self, id: RowId) -> Result<Option<SnapEntry>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.snaps, |s| &s.audit, |s| s.id == id))
    }

    async fn list_snaps_by_account(&self, account: RowId) -> Result<Vec<SnapEntry>> {
        let inner = self.read()?;
        Ok(inner
            .snaps
            .values()
            .filter(|s| s.account == account && !s.audit.is_deleted())
            .cloned()
            .collect())
    }

    async fn list_snaps(&self) -> Result<Vec<SnapEntry>> {
        let inner = self.read()?;
        Ok(inner
            .snaps
            .values()
            .filter(|s| !s.audit.is_deleted())
            .cloned()
            .collect())
    }

    async fn create_snap_with_default_tracks(&self, snap: &NewSnapEntry) -> Result<SnapEntry> {
        let mut inner = self.write()?;
        if !inner.accounts.contains_key(&snap.account) {
            return Err(StoreError::NotFound(format!("account {}", snap.account)));
        }
        if inner
            .snaps
            .values()
            .any(|s| s.name == snap.name || s.snap_id == snap.snap_id)
        {
            return Err(StoreError::AlreadyExists(format!("snap {}", snap.name)));
        }

        let now = now_millis();
        let entry = SnapEntry {
            id: inner.next_id(),
            name: snap.name.clone(),
            snap_id: snap.snap_id.clone(),
            account: snap.account,
            snap_type: snap.snap_type,
            confinement: None,
            base: None,
            audit: Audit::new(now),
        };
        inner.snaps.insert(entry.id, entry.clone());

        let placeholder = inner.insert_revision(&NewSnapRevision::placeholder(entry.id), now);
        inner.insert_track(entry.id, DEFAULT_TRACK, placeholder.id, now);
        Ok(entry)
    }

    async fn update_snap_metadata(&self, id: RowId, metadata: &SnapMetadata) -> Result<()> {
        let mut inner = self.write()?;
        let snap = inner
            .snaps
            .get_mut(&id)
            .filter(|s| !s.audit.is_deleted())
            .ok_or_else(|| StoreError::NotFound(format!("snap entry {}", id)))?;
        snap.snap_type = metadata.snap_type;
        snap.confinement = metadata.confinement;
        snap.base = metadata.base.clone();
        snap.audit.updated_at = now_millis();
        Ok(())
    }

    async fn revision_by_digest(
        &self,
        snap: RowId,
        sha3_384: &str,
    ) -> Result<Option<SnapRevision>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.revisions, |r| &r.audit, |r| {
            r.snap_entry == snap && r.sha3_384 == sha3_384
        }))
    }

    async fn revision_by_id(&self, id: RowId) -> Result<Option<SnapRevision>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.revisions, |r| &r.audit, |r| r.id == id))
    }

    async fn revision_by_encoded_digest(&self, encoded: &str) -> Result<Option<SnapRevision>> {
        if encoded.is_empty() {
            return Ok(None);
        }
        let inner = self.read()?;
        Ok(Inner::live(&inner.revisions, |r| &r.audit, |r| {
            r.sha3_384_encoded == encoded
        }))
    }

    async fn create_revision(
        &self,
        revision: &NewSnapRevision,
    ) -> Result<InsertResult<SnapRevision>> {
        let mut inner = self.write()?;
        inner.require_snap(revision.snap_entry)?;

        if let Some(existing) = inner
            .revisions
            .values()
            .find(|r| r.snap_entry == revision.snap_entry && r.sha3_384 == revision.sha3_384)
        {
            return Ok(InsertResult::AlreadyExists(existing.clone()));
        }

        let row = inner.insert_revision(revision, now_millis());
        Ok(InsertResult::Inserted(row))
    }

    async fn placeholder_revision(&self, snap: RowId) -> Result<Option<SnapRevision>> {
        self.revision_by_digest(snap, "").await
    }

    async fn add_track(&self, snap: RowId, name: &str) -> Result<SnapTrack> {
        let mut inner = self.write()?;
        inner.require_snap(snap)?;
        if inner
            .tracks
            .values()
            .any(|t| t.snap_entry == snap && t.name == name)
        {
            return Err(StoreError::AlreadyExists(format!("track {}", name)));
        }
        let placeholder = inner
            .revisions
            .values()
            .find(|r| r.snap_entry == snap && r.is_placeholder())
            .map(|r| r.id)
            .ok_or_else(|| StoreError::NotFound(format!("placeholder revision for snap {}", snap)))?;

        Ok(inner.insert_track(snap, name, placeholder, now_millis()))
    }

    async fn track_by_name(&self, snap: RowId, name: &str) -> Result<Option<SnapTrack>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.tracks, |t| &t.audit, |t| {
            t.snap_entry == snap && t.name == name
        }))
    }

    async fn list_tracks(&self, snap: RowId) -> Result<Vec<SnapTrack>> {
        let inner = self.read()?;
        Ok(inner
            .tracks
            .values()
            .filter(|t| t.snap_entry == snap && !t.audit.is_deleted())
            .cloned()
            .collect())
    }

    async fn risk_by_track(&self, track: RowId, risk: Risk) -> Result<Option<SnapRisk>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.risks, |r| &r.audit, |r| {
            r.track == track && r.risk == risk
        }))
    }

    async fn list_risks(&self, track: RowId) -> Result<Vec<SnapRisk>> {
        let inner = self.read()?;
        let mut risks: Vec<SnapRisk> = inner
            .risks
            .values()
            .filter(|r| r.track == track && !r.audit.is_deleted())
            .cloned()
            .collect();
        risks.sort_by_key(|r| r.risk);
        Ok(risks)
    }

    async fn set_risk_revision(&self, risk: RowId, revision: RowId) -> Result<()> {
        self.set_risk_revisions(&[risk], revision).await
    }

    async fn set_risk_revisions(&self, risks: &[RowId], revision: RowId) -> Result<()> {
        let mut inner = self.write()?;
        inner.require_revision(revision)?;
        for id in risks {
            match inner.risks.get(id) {
                Some(r) if !r.audit.is_deleted() => {}
                _ => return Err(StoreError::NotFound(format!("risk {}", id))),
            }
        }

        let now = now_millis();
        for id in risks {
            if let Some(row) = inner.risks.get_mut(id) {
                row.revision = revision;
                row.audit.updated_at = now;
            }
        }
        Ok(())
    }

    async fn add_branch(&self, risk: RowId, name: &str, revision: RowId) -> Result<SnapBranch> {
        let mut inner = self.write()?;
        if !inner.risks.contains_key(&risk) {
            return Err(StoreError::NotFound(format!("risk {}", risk)));
        }
        inner.require_revision(revision)?;
        if inner
            .branches
            .values()
            .any(|b| b.risk == risk && b.name == name)
        {
            return Err(StoreError::AlreadyExists(format!("branch {}", name)));
        }

        let row = SnapBranch {
            id: inner.next_id(),
            risk,
            name: name.to_string(),
            revision,
            audit: Audit::new(now_millis()),
        };
        inner.branches.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_branches(&self, risk: RowId) -> Result<Vec<SnapBranch>> {
        let inner = self.read()?;
        Ok(inner
            .branches
            .values()
            .filter(|b| b.risk == risk && !b.audit.is_deleted())
            .cloned()
            .collect())
    }

    async fn add_upload(&self, upload: &NewSnapUpload) -> Result<SnapUpload> {
        let mut inner = self.write()?;
        inner.require_snap(upload.snap_entry)?;
        if inner
            .uploads
            .values()
            .any(|u| u.up_down_id == upload.up_down_id)
        {
            return Err(StoreError::AlreadyExists(format!(
                "upload {}",
                upload.up_down_id
            )));
        }

        let row = SnapUpload {
            id: inner.next_id(),
            up_down_id: upload.up_down_id.clone(),
            snap_entry: upload.snap_entry,
            filesize: upload.filesize,
            channels: upload.channels.clone(),
            audit: Audit::new(now_millis()),
        };
        inner.uploads.insert(row.id, row.clone());
        Ok(row)
    }

    async fn upload_by_up_down_id(&self, up_down_id: &str) -> Result<Option<SnapUpload>> {
        let inner = self.read()?;
        Ok(Inner::live(&inner.uploads, |u| &u.audit, |u| u.up_down_id == up_down_id))
    }

    async fn delete_upload(&self, up_down_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let now = now_millis();
        for upload in inner
            .uploads
            .values_mut()
            .filter(|u| u.up_down_id == up_down_id && !u.audit.is_deleted())
        {
            upload.audit.deleted_at = Some(now);
            upload.audit.updated_at = now;
        }
        Ok(())
    }
}
