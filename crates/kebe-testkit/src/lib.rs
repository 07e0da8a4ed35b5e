//! # kebe testkit
//!
//! Testing utilities for the kebe snap store.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: SHA3-384 digests in both textual forms, and a
//!   table of channel strings with how they parse
//! - **Generators**: Proptest strategies for channels, names and snap bytes
//! - **Fixtures**: A provisioned store with a publisher who can log in
//!
//! ## Golden Vectors
//!
//! ```rust
//! use kebe_testkit::vectors::digest_vectors;
//!
//! for vector in digest_vectors() {
//!     let d = kebe_core::digest(&vector.input());
//!     assert_eq!(d.raw, vector.hex);
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use kebe_testkit::fixtures::TestFixture;
//!
//! async fn example() -> kebe::Result<()> {
//!     let fixture = TestFixture::new().await?;
//!     fixture.register("hello").await?;
//!     let status = fixture.upload("hello", b"snap contents", "latest/edge").await?;
//!     assert!(status.processed);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{test_config, TestFixture};
