//! Identifier newtypes and small domain enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Assertion key id: encoded SHA3-384 of a public key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "KeyId({})", short)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable account identifier (the `account-id` header).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned snap id (the `snap-id` header).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapId(String);

impl SnapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snap type as declared in `meta/snap.yaml`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    #[default]
    App,
    Os,
    Base,
    Kernel,
    Gadget,
    Snapd,
}

impl SnapType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Os => "os",
            Self::Base => "base",
            Self::Kernel => "kernel",
            Self::Gadget => "gadget",
            Self::Snapd => "snapd",
        }
    }
}

impl FromStr for SnapType {
    type Err = CoreError;

    /// An empty string is an app, matching snap.yaml's default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "app" => Ok(Self::App),
            "os" => Ok(Self::Os),
            "base" => Ok(Self::Base),
            "kernel" => Ok(Self::Kernel),
            "gadget" => Ok(Self::Gadget),
            "snapd" => Ok(Self::Snapd),
            other => Err(CoreError::UnknownVariant {
                kind: "snap type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SnapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confinement {
    Strict,
    Classic,
    Devmode,
}

impl Confinement {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Classic => "classic",
            Self::Devmode => "devmode",
        }
    }
}

impl FromStr for Confinement {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "classic" => Ok(Self::Classic),
            "devmode" => Ok(Self::Devmode),
            other => Err(CoreError::UnknownVariant {
                kind: "confinement",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Confinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account validation level carried by account assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    Unproven,
    Verified,
    Starred,
    Certified,
}

impl Validation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unproven => "unproven",
            Self::Verified => "verified",
            Self::Starred => "starred",
            Self::Certified => "certified",
        }
    }
}

impl FromStr for Validation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unproven" => Ok(Self::Unproven),
            "verified" => Ok(Self::Verified),
            "starred" => Ok(Self::Starred),
            "certified" => Ok(Self::Certified),
            other => Err(CoreError::UnknownVariant {
                kind: "validation",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_type_defaults_to_app() {
        assert_eq!("".parse::<SnapType>().unwrap(), SnapType::App);
        assert_eq!(SnapType::default(), SnapType::App);
        assert_eq!("kernel".parse::<SnapType>().unwrap(), SnapType::Kernel);
        assert!("plugin".parse::<SnapType>().is_err());
    }

    #[test]
    fn test_enum_names_roundtrip() {
        for c in [Confinement::Strict, Confinement::Classic, Confinement::Devmode] {
            assert_eq!(c.as_str().parse::<Confinement>().unwrap(), c);
        }
        for v in [
            Validation::Unproven,
            Validation::Verified,
            Validation::Starred,
            Validation::Certified,
        ] {
            assert_eq!(v.as_str().parse::<Validation>().unwrap(), v);
        }
    }

    #[test]
    fn test_key_id_debug_is_short() {
        let id = KeyId::new("a".repeat(64));
        assert_eq!(format!("{:?}", id), format!("KeyId({})", "a".repeat(12)));
        assert_eq!(id.to_string().len(), 64);
    }
}
