//! Test fixtures and helpers.
//!
//! A [`TestFixture`] is a provisioned store with one publisher account that
//! can log in through the static identity provider.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use kebe::metadata::StaticExtractor;
use kebe::{KebeConfig, KebeError, RegisteredName, SnapStore, SnapYaml, StoreContext, UploadStatus};
use kebe_auth::{bind_discharge, AuthorizationHeader, StaticIdentityProvider};
use kebe_core::AccountId;
use kebe_store::{
    Account, BlobStore, FsBlobStore, MemoryBlobStore, MemoryRepository, NewAccount, Repository,
    SqliteRepository,
};

pub const PUBLISHER_USERNAME: &str = "publisher";
pub const PUBLISHER_PASSWORD: &str = "hunter2";
pub const PUBLISHER_EMAIL: &str = "publisher@example.com";
pub const PUBLISHER_ACCOUNT_ID: &str = "publisher-account";

/// Configuration with test macaroon secrets and default accounts.
pub fn test_config() -> KebeConfig {
    let mut config = KebeConfig::default();
    config.macaroon.root_key = "test-root-key".into();
    config.macaroon.root_id = "test-root-id".into();
    config.macaroon.root_location = "kebe.test".into();
    config.macaroon.discharge_key = "test-discharge-key".into();
    config.macaroon.third_party_caveat_id = "test-login".into();
    config.macaroon.third_party_location = "login.kebe.test".into();
    config.urls.dashboard = "https://dashboard.kebe.test/".into();
    config.urls.store_api = "https://api.kebe.test".into();
    config
}

pub type FixtureStore<R, B> = SnapStore<R, B, StaticIdentityProvider, StaticExtractor>;

/// A provisioned store with a publisher account.
pub struct TestFixture<R, B> {
    pub config: KebeConfig,
    pub store: FixtureStore<R, B>,
    pub publisher: Account,
}

impl TestFixture<MemoryRepository, MemoryBlobStore> {
    /// Create a fixture on in-memory backends.
    pub async fn new() -> Result<Self, KebeError> {
        Self::with_backends(MemoryRepository::new(), MemoryBlobStore::new(), SnapYaml::default())
            .await
    }

    /// Create an in-memory fixture whose extractor returns `snap_yaml`.
    pub async fn with_snap_yaml(snap_yaml: SnapYaml) -> Result<Self, KebeError> {
        Self::with_backends(MemoryRepository::new(), MemoryBlobStore::new(), snap_yaml).await
    }
}

impl TestFixture<SqliteRepository, FsBlobStore> {
    /// Create a fixture on SQLite and the filesystem under `dir`.
    ///
    /// Opening the same directory again sees everything a previous fixture
    /// stored there.
    pub async fn persistent(dir: &Path) -> Result<Self, KebeError> {
        let repo = SqliteRepository::open(dir.join("kebe.db"))?;
        let blobs = FsBlobStore::new(dir.join("blobs"));
        Self::with_backends(repo, blobs, SnapYaml::default()).await
    }
}

impl<R: Repository, B: BlobStore> TestFixture<R, B> {
    pub async fn with_backends(repo: R, blobs: B, snap_yaml: SnapYaml) -> Result<Self, KebeError> {
        let config = test_config();
        kebe::provision::initialize(&repo, &blobs, &config)
            .await
            .map_err(|e| KebeError::InvalidRequest(format!("provisioning failed: {:#}", e)))?;
        let ctx = StoreContext::load(&blobs, &config)
            .await
            .map_err(|e| KebeError::InvalidRequest(format!("loading context failed: {:#}", e)))?;

        let publisher = match repo.account_by_email(PUBLISHER_EMAIL).await? {
            Some(account) => account,
            None => {
                repo.create_account(&NewAccount {
                    account_id: AccountId::new(PUBLISHER_ACCOUNT_ID),
                    username: PUBLISHER_USERNAME.into(),
                    display_name: "Test Publisher".into(),
                    email: PUBLISHER_EMAIL.into(),
                })
                .await?
            }
        };

        let identity = StaticIdentityProvider::new().with_verified_user(
            PUBLISHER_USERNAME,
            PUBLISHER_PASSWORD,
            PUBLISHER_EMAIL,
        );
        let store = SnapStore::new(
            Arc::new(ctx),
            repo,
            blobs,
            identity,
            StaticExtractor(snap_yaml),
        );

        Ok(Self {
            config,
            store,
            publisher,
        })
    }

    /// Run the full login flow and return an authorization header.
    pub async fn login(&self, payload: &str) -> Result<String, KebeError> {
        let root = self.store.issue_acl(payload)?;
        let discharge = self
            .store
            .issue_discharge(
                PUBLISHER_USERNAME,
                PUBLISHER_PASSWORD,
                &self.config.macaroon.third_party_caveat_id,
            )
            .await?;
        let discharge = bind_discharge(&root, &discharge).map_err(KebeError::Unauthorized)?;
        Ok(AuthorizationHeader { root, discharge }.to_string())
    }

    /// Register `name` to the publisher.
    pub async fn register(&self, name: &str) -> Result<RegisteredName, KebeError> {
        self.store
            .register_snap_name(PUBLISHER_EMAIL, name, false)
            .await
    }

    /// Stage, record and process one upload.
    pub async fn upload(
        &self,
        name: &str,
        contents: &[u8],
        channels: &str,
    ) -> Result<UploadStatus, KebeError> {
        let up_down_id = self
            .store
            .stage_upload(Bytes::copy_from_slice(contents))
            .await?;
        self.store
            .begin_upload(name, &up_down_id, contents.len() as u64, channels)
            .await?;
        self.store.process_upload(&up_down_id).await
    }
}
