//! Capability authorization for the kebe store.
//!
//! Publishers authenticate with a pair of macaroons:
//!
//! - a **root** macaroon minted by the store, carrying a third-party caveat
//!   addressed to the login service and an optional ACL scope;
//! - a **discharge** minted by the login service once an
//!   [`IdentityProvider`] accepts the user's credentials, carrying an
//!   `email=<address>` caveat.
//!
//! Both travel in one header, `Macaroon root=<b64>, discharge=<b64>`, with
//! the discharge bound to the root's signature. Tokens are standard v2
//! macaroons built with the [`macaroon`] crate.
//!
//! # Example
//!
//! ```no_run
//! use kebe_auth::{bind_discharge, AuthorizationHeader, MacaroonAuthority, MacaroonSecrets,
//!     StaticIdentityProvider};
//!
//! # async fn example(secrets: MacaroonSecrets) -> kebe_auth::Result<()> {
//! let authority = MacaroonAuthority::new(secrets);
//! let users = StaticIdentityProvider::new().with_verified_user("alice", "pw", "a@example.com");
//!
//! let root = authority.issue_acl("")?;
//! let discharge = authority.issue_discharge(&users, "alice", "pw", "caveat-id").await?;
//! let header = AuthorizationHeader { discharge: bind_discharge(&root, &discharge)?, root };
//!
//! let capability = authority.verify(&header.to_string())?;
//! assert_eq!(capability.email, "a@example.com");
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod authority;
pub mod error;
pub mod identity;

pub use acl::{AclPackage, AclRequest, AclScope, PERMISSIONS};
pub use authority::{
    bind_discharge, AuthorizationHeader, MacaroonAuthority, MacaroonSecrets, VerifiedCapability,
    UNSCOPED_CAVEAT,
};
pub use error::{AuthError, IdentityError, Result};
pub use identity::{IdentityProvider, StaticIdentityProvider, VerifiedIdentity};
