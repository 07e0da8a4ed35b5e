//! The store façade.
//!
//! [`SnapStore`] ties the immutable [`StoreContext`] to the repository, blob
//! store, identity provider and metadata extractor, and exposes every store
//! and dashboard operation. Authorization failures are logged with their
//! cause and returned as a bare [`KebeError::Unauthorized`].

use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use kebe_auth::{AuthError, IdentityProvider, PERMISSIONS};
use kebe_core::{
    split_channel_list, AccountId, Assertion, KeyId, PublicKey, Risk, SignedDocument, SnapId,
    SnapType, DEFAULT_TRACK,
};
use kebe_store::{
    buckets, Account, BlobStore, FsBlobStore, Key, NewKey, NewSnapEntry, Repository,
    SnapTrack, SqliteRepository, StoreError,
};
use serde::Serialize;

use crate::assertions::{self, EncodedAssertion, SERIES};
use crate::channels::{self, ChannelMap};
use crate::config::KebeConfig;
use crate::context::StoreContext;
use crate::error::{KebeError, Result};
use crate::ingest::{self, UploadAccepted, UploadStatus};
use crate::metadata::{extractor_for, MetadataExtractor};
use crate::provision;

const MAX_NAME_LEN: usize = 40;

/// Outcome of `verify_acl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclVerification {
    pub allowed: bool,
    pub account: AclAccount,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclAccount {
    pub email: String,
    pub display_name: String,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredName {
    pub snap_id: SnapId,
    pub name: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountKeyInfo {
    pub name: String,
    pub public_key_sha3_384: KeyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnap {
    pub series: String,
    pub name: String,
    pub snap_id: SnapId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub account_id: AccountId,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub account_keys: Vec<AccountKeyInfo>,
    pub snaps: Vec<AccountSnap>,
}

/// What a client needs to install or refresh a snap from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapActionResult {
    pub snap_id: SnapId,
    pub name: String,
    pub revision: i64,
    pub sha3_384: String,
    pub size: u64,
    pub snap_type: SnapType,
    pub download_filename: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindResult {
    pub name: String,
    pub snap_id: SnapId,
    pub publisher: String,
    pub snap_type: SnapType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapName {
    pub name: String,
    pub snap_id: SnapId,
}

/// A store on the configured SQLite database and blob directory.
pub type ProductionStore<I> = SnapStore<SqliteRepository, FsBlobStore, I, Box<dyn MetadataExtractor>>;

pub struct SnapStore<R, B, I, M> {
    ctx: Arc<StoreContext>,
    repo: R,
    blobs: B,
    identity: I,
    extractor: M,
}

impl<R, B, I, M> SnapStore<R, B, I, M>
where
    R: Repository,
    B: BlobStore,
    I: IdentityProvider,
    M: MetadataExtractor,
{
    pub fn new(ctx: Arc<StoreContext>, repo: R, blobs: B, identity: I, extractor: M) -> Self {
        Self {
            ctx,
            repo,
            blobs,
            identity,
            extractor,
        }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify a `Macaroon root=…, discharge=…` header and resolve its account.
    #[tracing::instrument(skip_all)]
    pub async fn authorize(&self, header: &str) -> Result<Account> {
        let capability = self
            .ctx
            .macaroons()
            .verify(header)
            .map_err(unauthorized)?;
        match self.repo.account_by_email(&capability.email).await? {
            Some(account) => {
                tracing::debug!(account = %account.account_id, "authorized");
                Ok(account)
            }
            None => Err(unauthorized(AuthError::UnknownAccount(capability.email))),
        }
    }

    /// Mint a root macaroon scoped by `payload`.
    #[tracing::instrument(skip(self))]
    pub fn issue_acl(&self, payload: &str) -> Result<String> {
        self.ctx.macaroons().issue_acl(payload).map_err(unauthorized)
    }

    /// Check credentials with the identity provider and mint a discharge.
    #[tracing::instrument(skip(self, credential))]
    pub async fn issue_discharge(
        &self,
        username: &str,
        credential: &str,
        caveat_id: &str,
    ) -> Result<String> {
        self.ctx
            .macaroons()
            .issue_discharge(&self.identity, username, credential, caveat_id)
            .await
            .map_err(unauthorized)
    }

    #[tracing::instrument(skip_all)]
    pub async fn verify_acl(&self, header: &str) -> Result<AclVerification> {
        let account = self.authorize(header).await?;
        Ok(AclVerification {
            allowed: true,
            account: AclAccount {
                email: account.email,
                display_name: account.display_name,
                verified: true,
            },
            permissions: PERMISSIONS.iter().map(|p| p.to_string()).collect(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Assertions
    // ─────────────────────────────────────────────────────────────────────────

    #[tracing::instrument(skip(self))]
    pub async fn account_assertion(&self, account_id: &AccountId) -> Result<EncodedAssertion> {
        let account = self
            .repo
            .account_by_account_id(account_id)
            .await?
            .ok_or_else(|| KebeError::NotFound(format!("account {}", account_id)))?;
        let validation = assertions::validation_for(&self.ctx, &account);
        assertions::encode(&self.ctx, &assertions::account(&self.ctx, &account, validation))
    }

    #[tracing::instrument(skip(self))]
    pub async fn account_key_assertion(&self, key_id: &KeyId) -> Result<EncodedAssertion> {
        let key = self
            .repo
            .key_by_id(key_id)
            .await?
            .ok_or_else(|| KebeError::NotFound(format!("account key {}", key_id)))?;
        let account = self.account_row(key.account).await?;
        assertions::encode(&self.ctx, &assertions::account_key(&self.ctx, &account, &key)?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn snap_declaration_assertion(&self, snap_id: &SnapId) -> Result<EncodedAssertion> {
        let snap = self
            .repo
            .snap_by_snap_id(snap_id)
            .await?
            .ok_or_else(|| KebeError::SnapNotFound(snap_id.to_string()))?;
        let publisher = self.account_row(snap.account).await?;
        assertions::encode(
            &self.ctx,
            &assertions::snap_declaration(&self.ctx, &snap, &publisher),
        )
    }

    #[tracing::instrument(skip(self))]
    pub async fn snap_revision_assertion(&self, encoded_digest: &str) -> Result<EncodedAssertion> {
        let revision = self
            .repo
            .revision_by_encoded_digest(encoded_digest)
            .await?
            .ok_or_else(|| KebeError::NotFound(format!("snap revision {}", encoded_digest)))?;
        let snap = self
            .repo
            .snap_by_id(revision.snap_entry)
            .await?
            .ok_or_else(|| KebeError::SnapNotFound(revision.snap_entry.to_string()))?;
        let developer = self.account_row(snap.account).await?;
        assertions::encode(
            &self.ctx,
            &assertions::snap_revision(&self.ctx, &snap, &revision, &developer)?,
        )
    }

    /// Decode an assertion and verify it up to the trust anchor.
    pub fn verify_assertion(&self, bytes: &[u8]) -> Result<Assertion> {
        let doc = SignedDocument::decode(bytes)?;
        self.ctx.trust().verify(&doc)?;
        Ok(Assertion::from_document(&doc)?)
    }

    async fn account_row(&self, id: i64) -> Result<Account> {
        self.repo
            .account_by_id(id)
            .await?
            .ok_or_else(|| KebeError::NotFound(format!("account row {}", id)))
    }

    async fn account_by_email(&self, email: &str) -> Result<Account> {
        self.repo
            .account_by_email(email)
            .await?
            .ok_or_else(|| KebeError::NotFound(format!("account {}", email)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Uploads and releases
    // ─────────────────────────────────────────────────────────────────────────

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn stage_upload(&self, data: Bytes) -> Result<String> {
        ingest::stage_upload(&self.blobs, data).await
    }

    /// `channels` is the comma-separated list sent by clients.
    #[tracing::instrument(skip(self))]
    pub async fn begin_upload(
        &self,
        name: &str,
        up_down_id: &str,
        filesize: u64,
        channels: &str,
    ) -> Result<UploadAccepted> {
        ingest::begin_upload(
            &self.repo,
            &self.blobs,
            self.ctx.dashboard_url(),
            name,
            up_down_id,
            filesize,
            split_channel_list(channels),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn process_upload(&self, up_down_id: &str) -> Result<UploadStatus> {
        ingest::process_upload(&self.repo, &self.blobs, &self.extractor, up_down_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, name: &str, revision: i64, channels: &[String]) -> Result<bool> {
        if name.is_empty() {
            return Err(KebeError::InvalidRequest("snap name is required".into()));
        }
        if revision <= 0 {
            return Err(KebeError::InvalidRequest("revision must be positive".into()));
        }
        if channels.is_empty() {
            return Err(KebeError::InvalidRequest("no channels to release to".into()));
        }

        let snap = self
            .repo
            .snap_by_name(name)
            .await?
            .ok_or_else(|| KebeError::SnapNotFound(name.to_string()))?;
        let revision = self
            .repo
            .revision_by_id(revision)
            .await?
            .filter(|r| !r.is_placeholder())
            .ok_or(KebeError::RevisionNotFound(revision))?;

        channels::release(&self.repo, &snap, channels, &revision).await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    pub async fn channel_map(&self, name: &str) -> Result<ChannelMap> {
        let snap = self.snap(name).await?;
        channels::channel_map(&self.repo, &snap).await
    }

    async fn snap(&self, name: &str) -> Result<kebe_store::SnapEntry> {
        self.repo
            .snap_by_name(name)
            .await?
            .ok_or_else(|| KebeError::SnapNotFound(name.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dashboard
    // ─────────────────────────────────────────────────────────────────────────

    #[tracing::instrument(skip(self))]
    pub async fn register_snap_name(
        &self,
        email: &str,
        name: &str,
        dry_run: bool,
    ) -> Result<RegisteredName> {
        validate_snap_name(name)?;
        let account = self.account_by_email(email).await?;
        if self.repo.snap_by_name(name).await?.is_some() {
            return Err(KebeError::AlreadyRegistered(name.to_string()));
        }

        let snap_id = SnapId::new(uuid::Uuid::new_v4().to_string());
        if dry_run {
            return Ok(RegisteredName {
                snap_id,
                name: name.to_string(),
                dry_run,
            });
        }

        let snap = self
            .repo
            .create_snap_with_default_tracks(&NewSnapEntry {
                name: name.to_string(),
                snap_id,
                account: account.id,
                snap_type: SnapType::App,
            })
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => KebeError::AlreadyRegistered(name.to_string()),
                other => other.into(),
            })?;
        tracing::info!(snap = %snap.name, snap_id = %snap.snap_id, account = %account.account_id, "registered snap name");

        Ok(RegisteredName {
            snap_id: snap.snap_id,
            name: snap.name,
            dry_run,
        })
    }

    /// Record a publisher key. `key_id` must be the SHA3-384 id of the key.
    #[tracing::instrument(skip(self, encoded_public_key))]
    pub async fn add_account_key(
        &self,
        email: &str,
        name: &str,
        key_id: &KeyId,
        encoded_public_key: &str,
    ) -> Result<Key> {
        let public_key = PublicKey::decode(encoded_public_key)
            .map_err(|e| KebeError::InvalidRequest(format!("bad public key: {}", e)))?;
        if public_key.key_id() != *key_id {
            return Err(KebeError::InvalidRequest(format!(
                "key id {} does not match public key",
                key_id
            )));
        }
        let account = self.account_by_email(email).await?;
        let key = self
            .repo
            .add_key(&NewKey {
                account: account.id,
                name: name.to_string(),
                sha3_384: key_id.clone(),
                encoded_public_key: public_key.encode(),
            })
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => KebeError::AlreadyRegistered(key_id.to_string()),
                other => other.into(),
            })?;
        tracing::info!(account = %account.account_id, key_id = %key.sha3_384, "added account key");
        Ok(key)
    }

    #[tracing::instrument(skip(self))]
    pub async fn account_info(&self, email: &str) -> Result<AccountInfo> {
        let account = self.account_by_email(email).await?;
        let account_keys = self
            .repo
            .list_keys(account.id)
            .await?
            .into_iter()
            .map(|k| AccountKeyInfo {
                name: k.name,
                public_key_sha3_384: k.sha3_384,
            })
            .collect();
        let snaps = self
            .repo
            .list_snaps_by_account(account.id)
            .await?
            .into_iter()
            .map(|s| AccountSnap {
                series: SERIES.to_string(),
                name: s.name,
                snap_id: s.snap_id,
            })
            .collect();

        Ok(AccountInfo {
            account_id: account.account_id,
            username: account.username,
            display_name: account.display_name,
            email: account.email,
            account_keys,
            snaps,
        })
    }

    /// Add a track with the four default risks.
    #[tracing::instrument(skip(self))]
    pub async fn add_track(&self, name: &str, track: &str) -> Result<SnapTrack> {
        if track.is_empty() || track.contains('/') || track.contains(',') {
            return Err(KebeError::InvalidRequest(format!("bad track name {:?}", track)));
        }
        if Risk::from_name(track).is_some() {
            return Err(KebeError::InvalidRequest(format!(
                "track name {:?} is a risk",
                track
            )));
        }
        let snap = self.snap(name).await?;
        let created = self.repo.add_track(snap.id, track).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => KebeError::AlreadyRegistered(format!("{}/{}", name, track)),
            other => other.into(),
        })?;
        tracing::info!(snap = %snap.name, track, "added track");
        Ok(created)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store API
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve an install or refresh of `name` from `channel`.
    #[tracing::instrument(skip(self))]
    pub async fn snap_action(&self, name: &str, channel: Option<&str>) -> Result<SnapActionResult> {
        let snap = self.snap(name).await?;
        let channel = channel.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_TRACK);
        let revision = channels::resolve(&self.repo, &snap, channel).await?;
        if revision.is_placeholder() {
            return Err(KebeError::NotFound(format!(
                "nothing released to {} for {}",
                channel, name
            )));
        }

        Ok(SnapActionResult {
            download_url: format!("{}/download/snaps/{}", self.ctx.store_api_url(), revision.filename),
            download_filename: revision.filename,
            snap_id: snap.snap_id,
            name: snap.name,
            revision: revision.id,
            sha3_384: revision.sha3_384,
            size: revision.size,
            snap_type: snap.snap_type,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn download(&self, filename: &str) -> Result<Bytes> {
        self.blobs
            .get(buckets::SNAPS, filename)
            .await
            .map_err(|e| match e {
                StoreError::BlobNotFound { .. } | StoreError::InvalidData(_) => {
                    KebeError::NotFound(format!("snap file {}", filename))
                }
                other => other.into(),
            })
    }

    #[tracing::instrument(skip(self))]
    pub async fn find(&self, name: &str) -> Result<Vec<FindResult>> {
        let Some(snap) = self.repo.snap_by_name(name).await? else {
            return Ok(Vec::new());
        };
        let publisher = self.account_row(snap.account).await?;
        Ok(vec![FindResult {
            name: snap.name,
            snap_id: snap.snap_id,
            publisher: publisher.username,
            snap_type: snap.snap_type,
        }])
    }

    #[tracing::instrument(skip(self))]
    pub async fn snap_names(&self) -> Result<Vec<SnapName>> {
        Ok(self
            .repo
            .list_snaps()
            .await?
            .into_iter()
            .map(|s| SnapName {
                name: s.name,
                snap_id: s.snap_id,
            })
            .collect())
    }
}

impl<I: IdentityProvider> ProductionStore<I> {
    /// Open the configured backends, provision them if needed, and load the
    /// store context.
    pub async fn open(config: &KebeConfig, identity: I) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let repo = SqliteRepository::open(&config.database.path)
            .with_context(|| format!("opening database {}", config.database.path))?;
        let blobs = FsBlobStore::new(config.blobs.root.clone());

        provision::initialize(&repo, &blobs, config).await?;
        let ctx = StoreContext::load(&blobs, config).await?;
        tracing::info!(
            authority = %ctx.authority_id(),
            database = %config.database.path,
            metadata = config.metadata.enabled,
            "store opened"
        );

        Ok(SnapStore::new(
            Arc::new(ctx),
            repo,
            blobs,
            identity,
            extractor_for(&config.metadata),
        ))
    }
}

fn unauthorized(err: AuthError) -> KebeError {
    tracing::warn!(error = %err, "authorization rejected");
    KebeError::Unauthorized(err)
}

/// Lowercase letters, digits and inner single hyphens, with at least one letter.
fn validate_snap_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && name.chars().any(|c| c.is_ascii_lowercase())
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if valid {
        Ok(())
    } else {
        Err(KebeError::InvalidRequest(format!("invalid snap name {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_snap_name_rules() {
        for ok in ["hello", "hello-world", "a1", "0ad"] {
            assert!(validate_snap_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "Hello", "-a", "a-", "a--b", "123", "a_b", &"a".repeat(41)] {
            assert!(validate_snap_name(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_action_result_json() {
        let result = SnapActionResult {
            snap_id: SnapId::new("abc"),
            name: "hello".into(),
            revision: 3,
            sha3_384: "ff".into(),
            size: 10,
            snap_type: SnapType::App,
            download_filename: "x.snap".into(),
            download_url: "https://api/download/snaps/x.snap".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["snap_id"], "abc");
        assert_eq!(json["revision"], 3);
        assert_eq!(json["snap_type"], "app");
    }

    proptest! {
        #[test]
        fn generated_names_are_valid(name in "[a-z][a-z0-9]{0,10}(-[a-z0-9]{1,8}){0,3}") {
            prop_assert!(validate_snap_name(&name).is_ok());
        }

        #[test]
        fn uppercase_names_are_rejected(name in "[a-z]{0,5}[A-Z][a-z]{0,5}") {
            prop_assert!(validate_snap_name(&name).is_err());
        }
    }
}
