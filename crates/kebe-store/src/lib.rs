//! # kebe store
//!
//! Persistence for the snap store behind two traits:
//!
//! - [`Repository`] - accounts, keys, snaps, revisions, channels and uploads
//! - [`BlobStore`] - bucketed binary objects (staged and permanent snaps,
//!   provisioned keys and assertions)
//!
//! [`SqliteRepository`] and [`FsBlobStore`] are the production backends;
//! [`MemoryRepository`] and [`MemoryBlobStore`] have the same semantics and
//! are used by tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kebe_store::{SqliteRepository, Repository, NewAccount};
//! use kebe_core::AccountId;
//!
//! async fn example() -> kebe_store::Result<()> {
//!     let repo = SqliteRepository::open("kebe.db")?;
//!     let account = repo
//!         .create_account(&NewAccount {
//!             account_id: AccountId::new("acct-1"),
//!             username: "alice".into(),
//!             display_name: "Alice".into(),
//!             email: "alice@example.com".into(),
//!         })
//!         .await?;
//!     let found = repo.account_by_email("alice@example.com").await?;
//!     assert_eq!(found.map(|a| a.id), Some(account.id));
//!     Ok(())
//! }
//! ```
//!
//! ## Notes
//!
//! - Deletes are soft: rows keep a `deleted_at` stamp and vanish from lookups.
//! - A snap owns at most one revision per digest; [`Repository::create_revision`]
//!   reports [`InsertResult::AlreadyExists`] instead of failing.
//! - Every snap owns one placeholder revision that fresh risks point at.

pub mod blob;
pub mod error;
pub mod memory;
pub mod migration;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use blob::{buckets, BlobReader, BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{Result, StoreError};
pub use memory::MemoryRepository;
pub use models::{
    Account, Audit, Key, NewAccount, NewKey, NewSnapEntry, NewSnapRevision, NewSnapUpload,
    RowId, SnapBranch, SnapEntry, SnapMetadata, SnapRevision, SnapRisk, SnapTrack, SnapUpload,
};
pub use sqlite::SqliteRepository;
pub use traits::{InsertResult, Repository};

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
