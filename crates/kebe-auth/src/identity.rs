//! External identity provider used when minting discharges.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Identity asserted by the provider for a successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub email: String,
    pub email_verified: bool,
    /// Provider-specific claims, passed through untouched.
    #[serde(default)]
    pub claims: serde_json::Value,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check a username/credential pair.
    ///
    /// Implementations must reject identities whose email is unverified.
    async fn verify_credentials(
        &self,
        username: &str,
        credential: &str,
    ) -> std::result::Result<VerifiedIdentity, IdentityError>;
}

/// Fixed table of users, for tests and single-tenant deployments.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityProvider {
    users: HashMap<String, (String, VerifiedIdentity)>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
        identity: VerifiedIdentity,
    ) -> Self {
        self.users
            .insert(username.into(), (credential.into(), identity));
        self
    }

    /// Shorthand for a user with a verified email and no extra claims.
    pub fn with_verified_user(
        self,
        username: impl Into<String>,
        credential: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let identity = VerifiedIdentity {
            email: email.into(),
            email_verified: true,
            claims: serde_json::Value::Null,
        };
        self.with_user(username, credential, identity)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_credentials(
        &self,
        username: &str,
        credential: &str,
    ) -> std::result::Result<VerifiedIdentity, IdentityError> {
        let (expected, identity) = self
            .users
            .get(username)
            .ok_or(IdentityError::InvalidCredentials)?;
        if expected != credential {
            return Err(IdentityError::InvalidCredentials);
        }
        if !identity.email_verified {
            return Err(IdentityError::EmailNotVerified(identity.email.clone()));
        }
        Ok(identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticIdentityProvider::new()
            .with_verified_user("alice", "pw", "alice@example.com")
            .with_user(
                "bob",
                "pw",
                VerifiedIdentity {
                    email: "bob@example.com".into(),
                    email_verified: false,
                    claims: serde_json::json!({"sub": "bob"}),
                },
            );

        let id = provider.verify_credentials("alice", "pw").await.unwrap();
        assert_eq!(id.email, "alice@example.com");

        assert_eq!(
            provider.verify_credentials("alice", "nope").await,
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            provider.verify_credentials("carol", "pw").await,
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            provider.verify_credentials("bob", "pw").await,
            Err(IdentityError::EmailNotVerified("bob@example.com".into()))
        );
    }
}
