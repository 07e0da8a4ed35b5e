//! Snap metadata extraction.
//!
//! Reads `meta/snap.yaml` out of a squashfs image with `unsquashfs`.
//! Extraction is best effort: callers treat any failure as degraded
//! metadata, never as a failed upload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kebe_core::{Confinement, SnapType};
use kebe_store::SnapMetadata;
use serde::Deserialize;
use thiserror::Error;

use crate::config::MetadataConfig;

const SNAP_YAML: &str = "meta/snap.yaml";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata extraction disabled")]
    Disabled,

    #[error("failed to read snap: {0}")]
    Source(String),

    #[error("failed to run unsquashfs: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("unsquashfs exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("failed to read snap.yaml: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snap.yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {field} in snap.yaml: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Fields of `meta/snap.yaml` the store cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapYaml {
    pub name: String,
    pub version: String,
    pub summary: String,
    pub description: String,
    #[serde(rename = "type")]
    pub snap_type: String,
    pub architectures: Vec<String>,
    pub confinement: String,
    pub grade: String,
    pub base: String,
}

impl SnapYaml {
    pub fn parse(yaml: &str) -> Result<Self, MetadataError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The typed subset persisted on the snap entry. An empty type is `app`.
    pub fn to_metadata(&self) -> Result<SnapMetadata, MetadataError> {
        let snap_type = if self.snap_type.is_empty() {
            SnapType::App
        } else {
            self.snap_type
                .parse::<SnapType>()
                .map_err(|_| MetadataError::InvalidField {
                    field: "type",
                    value: self.snap_type.clone(),
                })?
        };
        let confinement = match self.confinement.as_str() {
            "" => None,
            other => Some(other.parse::<Confinement>().map_err(|_| {
                MetadataError::InvalidField {
                    field: "confinement",
                    value: other.to_string(),
                }
            })?),
        };
        Ok(SnapMetadata {
            snap_type,
            confinement,
            base: Some(self.base.clone()).filter(|b| !b.is_empty()),
        })
    }
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Read metadata from a snap file on local disk.
    async fn extract(&self, snap_file: &Path) -> Result<SnapYaml, MetadataError>;

    /// Whether `extract` can succeed at all; disabled extractors are
    /// skipped without staging the snap on disk.
    fn enabled(&self) -> bool {
        true
    }
}

#[async_trait]
impl<T: MetadataExtractor + ?Sized> MetadataExtractor for Box<T> {
    async fn extract(&self, snap_file: &Path) -> Result<SnapYaml, MetadataError> {
        (**self).extract(snap_file).await
    }

    fn enabled(&self) -> bool {
        (**self).enabled()
    }
}

/// The extractor selected by configuration.
pub fn extractor_for(config: &MetadataConfig) -> Box<dyn MetadataExtractor> {
    if config.enabled {
        Box::new(UnsquashfsExtractor::new(&config.unsquashfs))
    } else {
        Box::new(NoopExtractor)
    }
}

/// Extracts with the `unsquashfs` binary into a scratch directory.
#[derive(Debug, Clone)]
pub struct UnsquashfsExtractor {
    binary: PathBuf,
}

impl UnsquashfsExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for UnsquashfsExtractor {
    fn default() -> Self {
        Self::new("unsquashfs")
    }
}

#[async_trait]
impl MetadataExtractor for UnsquashfsExtractor {
    async fn extract(&self, snap_file: &Path) -> Result<SnapYaml, MetadataError> {
        let scratch = tempfile::tempdir()?;
        let dest = scratch.path().join("root");

        let output = tokio::process::Command::new(&self.binary)
            .arg("-d")
            .arg(&dest)
            .arg(snap_file)
            .arg(SNAP_YAML)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(MetadataError::Spawn)?;

        if !output.status.success() {
            return Err(MetadataError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let yaml = tokio::fs::read_to_string(dest.join(SNAP_YAML)).await?;
        SnapYaml::parse(&yaml)
    }
}

/// Extractor that always reports extraction as disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

#[async_trait]
impl MetadataExtractor for NoopExtractor {
    async fn extract(&self, _snap_file: &Path) -> Result<SnapYaml, MetadataError> {
        Err(MetadataError::Disabled)
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Extractor returning a fixed `snap.yaml`, for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticExtractor(pub SnapYaml);

#[async_trait]
impl MetadataExtractor for StaticExtractor {
    async fn extract(&self, _snap_file: &Path) -> Result<SnapYaml, MetadataError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: hello
version: "2.10"
summary: GNU Hello
description: |
  Prints a friendly greeting.
confinement: strict
grade: stable
base: core20
architectures:
  - amd64
apps:
  hello:
    command: bin/hello
"#;

    #[test]
    fn test_parse_snap_yaml() {
        let yaml = SnapYaml::parse(YAML).unwrap();
        assert_eq!(yaml.name, "hello");
        assert_eq!(yaml.version, "2.10");
        assert_eq!(yaml.architectures, vec!["amd64"]);
        assert!(yaml.snap_type.is_empty());

        let meta = yaml.to_metadata().unwrap();
        assert_eq!(meta.snap_type, SnapType::App);
        assert_eq!(meta.confinement, Some(Confinement::Strict));
        assert_eq!(meta.base.as_deref(), Some("core20"));
    }

    #[test]
    fn test_invalid_fields() {
        let yaml = SnapYaml {
            snap_type: "toaster".into(),
            ..Default::default()
        };
        assert!(matches!(
            yaml.to_metadata(),
            Err(MetadataError::InvalidField { field: "type", .. })
        ));

        let yaml = SnapYaml {
            snap_type: "base".into(),
            confinement: "loose".into(),
            ..Default::default()
        };
        assert!(matches!(
            yaml.to_metadata(),
            Err(MetadataError::InvalidField {
                field: "confinement",
                ..
            })
        ));
        assert!(SnapYaml::parse("name: [unclosed").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let extractor = UnsquashfsExtractor::new("/nonexistent/unsquashfs");
        let err = extractor.extract(Path::new("/tmp/x.snap")).await.unwrap_err();
        assert!(matches!(err, MetadataError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_noop_extractor() {
        assert!(!NoopExtractor.enabled());
        let config = MetadataConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!extractor_for(&config).enabled());
        assert!(matches!(
            NoopExtractor.extract(Path::new("x")).await,
            Err(MetadataError::Disabled)
        ));
    }
}
