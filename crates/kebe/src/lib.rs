//! # kebe
//!
//! The trust and distribution core of a self-hosted snap store.
//!
//! ## Overview
//!
//! [`SnapStore`] is the single entry point. It combines:
//!
//! - **Authorization**: macaroon capabilities minted and verified by
//!   [`kebe_auth`], resolved to store accounts
//! - **Assertions**: root-signed account, account-key, snap-declaration and
//!   snap-revision documents built on demand from store rows
//! - **Channels**: `track/risk` resolution and atomic multi-channel release
//! - **Ingestion**: staged uploads digested with SHA3-384, deduplicated per
//!   snap, and enriched with metadata from `meta/snap.yaml`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kebe::{KebeConfig, ProductionStore};
//! use kebe::auth::StaticIdentityProvider;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = KebeConfig::load(None)?;
//!     kebe::logging::init(&config.log.filter);
//!
//!     let identity = StaticIdentityProvider::new()
//!         .with_verified_user("alice", "secret", "alice@example.com");
//!     let store = ProductionStore::open(&config, identity).await?;
//!
//!     let map = store.channel_map("hello").await?;
//!     for entry in map.channel_map {
//!         println!("{} -> {}", entry.channel, entry.revision);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Notes
//!
//! - All store state outside the repository lives in an immutable
//!   [`StoreContext`] built once at start-up.
//! - Errors carry a stable [`PublicErrorCode`]; authorization failures never
//!   reveal their cause to callers.

pub mod assertions;
pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metadata;
pub mod provision;
pub mod service;

pub use assertions::EncodedAssertion;
pub use channels::{ChannelMap, ChannelMapEntry};
pub use config::{ConfigError, KebeConfig};
pub use context::StoreContext;
pub use error::{KebeError, PublicErrorCode, Result};
pub use ingest::{IngestOutcome, MetadataOutcome, UploadAccepted, UploadStatus};
pub use metadata::{MetadataExtractor, NoopExtractor, SnapYaml, StaticExtractor, UnsquashfsExtractor};
pub use provision::{initialize, Provisioned};
pub use service::{
    AccountInfo, AclVerification, FindResult, ProductionStore, RegisteredName, SnapActionResult,
    SnapName, SnapStore,
};

// Re-export component crates
pub use kebe_auth as auth;
pub use kebe_core as core;
pub use kebe_store as store;
