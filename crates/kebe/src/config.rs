//! Store configuration.
//!
//! Loaded from TOML, then overridden by `KEBE_*` environment variables:
//!
//! ```toml
//! root_authority = "kebe-store"
//!
//! [macaroon]
//! root_key = "..."
//! root_id = "kebe-root"
//! root_location = "kebe"
//! discharge_key = "..."
//! third_party_caveat_id = "kebe-login"
//! third_party_location = "login.kebe.example"
//!
//! [urls]
//! dashboard = "https://dashboard.kebe.example"
//! store_api = "https://api.kebe.example"
//!
//! [database]
//! path = "/var/lib/kebe/kebe.db"
//!
//! [blobs]
//! root = "/var/lib/kebe/blobs"
//! ```

use std::path::{Path, PathBuf};

use kebe_auth::MacaroonSecrets;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "KEBE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(String),

    #[error("invalid configuration value {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KebeConfig {
    /// `authority-id` of every assertion the store signs.
    pub root_authority: String,
    pub macaroon: MacaroonConfig,
    pub urls: UrlConfig,
    pub database: DatabaseConfig,
    pub blobs: BlobConfig,
    pub metadata: MetadataConfig,
    pub accounts: AccountsConfig,
    pub log: LogConfig,
}

impl Default for KebeConfig {
    fn default() -> Self {
        Self {
            root_authority: "kebe-store".to_string(),
            macaroon: MacaroonConfig::default(),
            urls: UrlConfig::default(),
            database: DatabaseConfig::default(),
            blobs: BlobConfig::default(),
            metadata: MetadataConfig::default(),
            accounts: AccountsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MacaroonConfig {
    pub root_key: String,
    pub root_id: String,
    pub root_location: String,
    pub discharge_key: String,
    pub third_party_caveat_id: String,
    pub third_party_location: String,
}

impl std::fmt::Debug for MacaroonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacaroonConfig")
            .field("root_id", &self.root_id)
            .field("root_location", &self.root_location)
            .field("third_party_caveat_id", &self.third_party_caveat_id)
            .field("third_party_location", &self.third_party_location)
            .finish_non_exhaustive()
    }
}

impl MacaroonConfig {
    pub fn secrets(&self) -> MacaroonSecrets {
        MacaroonSecrets {
            root_key: self.root_key.clone(),
            root_id: self.root_id.clone(),
            root_location: self.root_location.clone(),
            discharge_key: self.discharge_key.clone(),
            third_party_caveat_id: self.third_party_caveat_id.clone(),
            third_party_location: self.third_party_location.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    pub dashboard: String,
    pub store_api: String,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            dashboard: "http://localhost:8080".to_string(),
            store_api: "http://localhost:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "kebe.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub root: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("blobs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub enabled: bool,
    pub unsquashfs: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unsquashfs: PathBuf::from("unsquashfs"),
        }
    }
}

/// Accounts created when the store is provisioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub root: AccountInit,
    pub generic: AccountInit,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            root: AccountInit {
                id: "kebe-store".to_string(),
                username: "kebe-store".to_string(),
                display_name: "Kebe Store".to_string(),
                email: "root@kebe.invalid".to_string(),
            },
            generic: AccountInit {
                id: "generic".to_string(),
                username: "generic".to_string(),
                display_name: "Generic".to_string(),
                email: "generic@kebe.invalid".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountInit {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl KebeConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Read a file (if given), apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KEBE_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        let strings: [(&str, &mut String); 14] = [
            ("ROOT_AUTHORITY", &mut self.root_authority),
            ("MACAROON_ROOT_KEY", &mut self.macaroon.root_key),
            ("MACAROON_ROOT_ID", &mut self.macaroon.root_id),
            ("MACAROON_ROOT_LOCATION", &mut self.macaroon.root_location),
            ("MACAROON_DISCHARGE_KEY", &mut self.macaroon.discharge_key),
            (
                "MACAROON_THIRD_PARTY_CAVEAT_ID",
                &mut self.macaroon.third_party_caveat_id,
            ),
            (
                "MACAROON_THIRD_PARTY_LOCATION",
                &mut self.macaroon.third_party_location,
            ),
            ("URLS_DASHBOARD", &mut self.urls.dashboard),
            ("URLS_STORE_API", &mut self.urls.store_api),
            ("DATABASE_PATH", &mut self.database.path),
            ("LOG_FILTER", &mut self.log.filter),
            ("ACCOUNTS_ROOT_ID", &mut self.accounts.root.id),
            ("ACCOUNTS_ROOT_EMAIL", &mut self.accounts.root.email),
            ("ACCOUNTS_GENERIC_EMAIL", &mut self.accounts.generic.email),
        ];
        for (suffix, slot) in strings {
            if let Some(value) = get(suffix) {
                *slot = value;
            }
        }

        if let Some(root) = get("BLOBS_ROOT") {
            self.blobs.root = PathBuf::from(root);
        }
        if let Some(bin) = get("METADATA_UNSQUASHFS") {
            self.metadata.unsquashfs = PathBuf::from(bin);
        }
        if let Some(enabled) = get("METADATA_ENABLED") {
            self.metadata.enabled = enabled.parse().map_err(|_| ConfigError::Invalid {
                key: format!("{}METADATA_ENABLED", ENV_PREFIX),
                reason: format!("expected true or false, got {:?}", enabled),
            })?;
        }
        Ok(())
    }

    /// Reject configurations the store cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("root_authority", &self.root_authority),
            ("macaroon.root_key", &self.macaroon.root_key),
            ("macaroon.root_id", &self.macaroon.root_id),
            ("macaroon.discharge_key", &self.macaroon.discharge_key),
            (
                "macaroon.third_party_caveat_id",
                &self.macaroon.third_party_caveat_id,
            ),
            (
                "macaroon.third_party_location",
                &self.macaroon.third_party_location,
            ),
            ("urls.dashboard", &self.urls.dashboard),
            ("accounts.root.id", &self.accounts.root.id),
            ("accounts.generic.id", &self.accounts.generic.id),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key.to_string()));
            }
        }
        if self.accounts.root.id != self.root_authority {
            return Err(ConfigError::Invalid {
                key: "accounts.root.id".to_string(),
                reason: "must equal root_authority".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL for upload status links, without a trailing slash.
    pub fn dashboard_url(&self) -> &str {
        self.urls.dashboard.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        root_authority = "kebe-store"

        [macaroon]
        root_key = "root-secret"
        root_id = "kebe-root"
        root_location = "kebe"
        discharge_key = "discharge-secret"
        third_party_caveat_id = "kebe-login"
        third_party_location = "login.kebe"

        [urls]
        dashboard = "https://dash.example/"

        [database]
        path = ":memory:"
    "#;

    #[test]
    fn test_parse_and_validate() {
        let config = KebeConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.dashboard_url(), "https://dash.example");
        assert!(config.metadata.enabled);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.accounts.root.id, "kebe-store");
    }

    #[test]
    fn test_missing_secret() {
        let config = KebeConfig::default();
        match config.validate() {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "macaroon.root_key"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KEBE_MACAROON_ROOT_KEY", "from-env"),
            ("KEBE_BLOBS_ROOT", "/srv/blobs"),
            ("KEBE_METADATA_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = KebeConfig::from_toml(SAMPLE).unwrap();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.macaroon.root_key, "from-env");
        assert_eq!(config.blobs.root, PathBuf::from("/srv/blobs"));
        assert!(!config.metadata.enabled);

        let mut config = KebeConfig::default();
        let err = config
            .apply_overrides(|k| (k == "KEBE_METADATA_ENABLED").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = KebeConfig::from_toml(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("root-secret"));
        assert!(!debug.contains("discharge-secret"));
    }
}
