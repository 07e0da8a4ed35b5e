//! One-time store provisioning.
//!
//! Creates the root and generic signing keys, their accounts, and the
//! root-signed account and account-key assertions that anchor the trust
//! chain. Running it again reuses everything that already exists.

use anyhow::Context as _;
use bytes::Bytes;
use kebe_core::{AccountId, Keypair, KeyId, Validation};
use kebe_store::{buckets, Account, BlobStore, NewAccount, NewKey, Repository};

use crate::assertions;
use crate::config::{AccountInit, KebeConfig};
use crate::context::StoreContext;

/// Object key of the hex-encoded private key seed.
pub const PRIVATE_KEY: &str = "private-key";
pub const ACCOUNT_ASSERTION: &str = "account.assertion";
pub const ACCOUNT_KEY_ASSERTION: &str = "account-key.assertion";

const DEFAULT_KEY_NAME: &str = "default";

/// What provisioning produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub root_key_id: KeyId,
    pub generic_key_id: KeyId,
    /// False when every key and account already existed.
    pub created: bool,
}

/// Provision a store. Idempotent.
pub async fn initialize<R, B>(repo: &R, blobs: &B, config: &KebeConfig) -> anyhow::Result<Provisioned>
where
    R: Repository + ?Sized,
    B: BlobStore + ?Sized,
{
    config.validate().context("invalid configuration")?;

    let (root_key, root_new) = load_or_create_key(blobs, buckets::ROOT).await?;
    let (generic_key, generic_new) = load_or_create_key(blobs, buckets::GENERIC).await?;

    // Assertions are signed with the root key; the generic key is not yet
    // attested, so the context starts from the anchor alone.
    let ctx = StoreContext::new(config, root_key.clone(), generic_key.clone(), None)?;

    let mut created = root_new || generic_new;
    created |= provision_account(repo, blobs, &ctx, &config.accounts.root, buckets::ROOT, &root_key)
        .await
        .context("provisioning root account")?;
    created |= provision_account(
        repo,
        blobs,
        &ctx,
        &config.accounts.generic,
        buckets::GENERIC,
        &generic_key,
    )
    .await
    .context("provisioning generic account")?;

    if created {
        tracing::info!(
            authority = %config.root_authority,
            root_key = %root_key.key_id(),
            generic_key = %generic_key.key_id(),
            "store provisioned"
        );
    } else {
        tracing::debug!("store already provisioned");
    }

    Ok(Provisioned {
        root_key_id: root_key.key_id(),
        generic_key_id: generic_key.key_id(),
        created,
    })
}

async fn load_or_create_key<B: BlobStore + ?Sized>(
    blobs: &B,
    bucket: &str,
) -> anyhow::Result<(Keypair, bool)> {
    if blobs.exists(bucket, PRIVATE_KEY).await? {
        let raw = blobs.get(bucket, PRIVATE_KEY).await?;
        let hex = std::str::from_utf8(&raw).with_context(|| format!("{} key is not text", bucket))?;
        let key = Keypair::from_seed_hex(hex.trim())
            .with_context(|| format!("{} key is malformed", bucket))?;
        return Ok((key, false));
    }

    let key = Keypair::generate();
    blobs
        .put(bucket, PRIVATE_KEY, Bytes::from(key.seed_hex()))
        .await
        .with_context(|| format!("storing {} key", bucket))?;
    tracing::info!(bucket, key_id = %key.key_id(), "generated signing key");
    Ok((key, true))
}

async fn provision_account<R, B>(
    repo: &R,
    blobs: &B,
    ctx: &StoreContext,
    init: &AccountInit,
    bucket: &str,
    key: &Keypair,
) -> anyhow::Result<bool>
where
    R: Repository + ?Sized,
    B: BlobStore + ?Sized,
{
    let mut created = false;
    let account_id = AccountId::new(init.id.clone());

    let account: Account = match repo.account_by_account_id(&account_id).await? {
        Some(account) => account,
        None => {
            created = true;
            repo.create_account(&NewAccount {
                account_id,
                username: init.username.clone(),
                display_name: init.display_name.clone(),
                email: init.email.clone(),
            })
            .await?
        }
    };

    let key_row = match repo.key_by_id(&key.key_id()).await? {
        Some(row) => row,
        None => {
            created = true;
            repo.add_key(&NewKey {
                account: account.id,
                name: DEFAULT_KEY_NAME.to_string(),
                sha3_384: key.key_id(),
                encoded_public_key: key.public_key().encode(),
            })
            .await?
        }
    };

    if !blobs.exists(bucket, ACCOUNT_ASSERTION).await? {
        let assertion = assertions::account(ctx, &account, Validation::Certified);
        let encoded = assertions::encode(ctx, &assertion)?;
        blobs.put(bucket, ACCOUNT_ASSERTION, encoded.bytes).await?;
        created = true;
    }
    if !blobs.exists(bucket, ACCOUNT_KEY_ASSERTION).await? {
        let assertion = assertions::account_key(ctx, &account, &key_row)?;
        let encoded = assertions::encode(ctx, &assertion)?;
        blobs.put(bucket, ACCOUNT_KEY_ASSERTION, encoded.bytes).await?;
        created = true;
    }

    Ok(created)
}
