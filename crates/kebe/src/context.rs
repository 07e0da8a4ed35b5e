//! Immutable process state shared by every operation.

use anyhow::Context as _;
use kebe_auth::MacaroonAuthority;
use kebe_core::{
    AccountId, Keypair, KeyId, MemoryKeypairManager, PublicKey, SignedDocument, TrustChain,
};
use kebe_store::{buckets, BlobStore};

use crate::config::KebeConfig;
use crate::provision::{ACCOUNT_KEY_ASSERTION, PRIVATE_KEY};

/// Keys, trust anchor, macaroon secrets and URLs, built once at start-up.
#[derive(Debug, Clone)]
pub struct StoreContext {
    authority_id: AccountId,
    generic_account_id: AccountId,
    keys: MemoryKeypairManager,
    root_key_id: KeyId,
    generic_key_id: KeyId,
    trust: TrustChain,
    macaroons: MacaroonAuthority,
    dashboard_url: String,
    store_api_url: String,
}

impl StoreContext {
    /// Assemble a context from keys already in hand.
    ///
    /// `generic_key_assertion` is the root-signed account-key assertion for
    /// the generic key; it extends the trust chain past the anchor.
    pub fn new(
        config: &KebeConfig,
        root_key: Keypair,
        generic_key: Keypair,
        generic_key_assertion: Option<SignedDocument>,
    ) -> anyhow::Result<Self> {
        let authority_id = AccountId::new(config.root_authority.clone());

        let mut trust = TrustChain::new();
        trust.add_anchor(authority_id.clone(), root_key.public_key());
        if let Some(doc) = generic_key_assertion {
            trust
                .add_account_key(doc)
                .context("generic account-key assertion is invalid")?;
        }

        let mut keys = MemoryKeypairManager::new();
        let root_key_id = keys.import(root_key);
        let generic_key_id = keys.import(generic_key);

        Ok(Self {
            authority_id,
            generic_account_id: AccountId::new(config.accounts.generic.id.clone()),
            keys,
            root_key_id,
            generic_key_id,
            trust,
            macaroons: MacaroonAuthority::new(config.macaroon.secrets()),
            dashboard_url: config.dashboard_url().to_string(),
            store_api_url: config.urls.store_api.trim_end_matches('/').to_string(),
        })
    }

    /// Read the provisioned keys and assertions back from the blob store.
    pub async fn load<B: BlobStore + ?Sized>(blobs: &B, config: &KebeConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let root_key = read_key(blobs, buckets::ROOT).await?;
        let generic_key = read_key(blobs, buckets::GENERIC).await?;

        let raw = blobs
            .get(buckets::GENERIC, ACCOUNT_KEY_ASSERTION)
            .await
            .context("reading generic account-key assertion")?;
        let doc = SignedDocument::decode(&raw).context("decoding generic account-key assertion")?;

        let ctx = Self::new(config, root_key, generic_key, Some(doc))?;
        tracing::info!(
            authority = %ctx.authority_id,
            root_key = %ctx.root_key_id,
            "store context loaded"
        );
        Ok(ctx)
    }

    pub fn authority_id(&self) -> &AccountId {
        &self.authority_id
    }

    /// Accounts whose keys the store itself holds.
    pub fn is_store_account(&self, account_id: &AccountId) -> bool {
        *account_id == self.authority_id || *account_id == self.generic_account_id
    }

    pub fn keys(&self) -> &MemoryKeypairManager {
        &self.keys
    }

    pub fn root_key_id(&self) -> &KeyId {
        &self.root_key_id
    }

    pub fn generic_key_id(&self) -> &KeyId {
        &self.generic_key_id
    }

    pub fn root_public_key(&self) -> Option<PublicKey> {
        kebe_core::KeypairManager::public_key(&self.keys, &self.root_key_id)
    }

    pub fn trust(&self) -> &TrustChain {
        &self.trust
    }

    pub fn macaroons(&self) -> &MacaroonAuthority {
        &self.macaroons
    }

    pub fn dashboard_url(&self) -> &str {
        &self.dashboard_url
    }

    pub fn store_api_url(&self) -> &str {
        &self.store_api_url
    }
}

async fn read_key<B: BlobStore + ?Sized>(blobs: &B, bucket: &str) -> anyhow::Result<Keypair> {
    let raw = blobs
        .get(bucket, PRIVATE_KEY)
        .await
        .with_context(|| format!("reading {}/{}", bucket, PRIVATE_KEY))?;
    let hex = std::str::from_utf8(&raw).with_context(|| format!("{} key is not text", bucket))?;
    Keypair::from_seed_hex(hex.trim()).with_context(|| format!("{} key is malformed", bucket))
}
