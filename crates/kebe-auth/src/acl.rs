//! ACL scope carried as a first-party caveat on the root macaroon.

use serde::{Deserialize, Serialize};

/// Permissions the store grants to every authorized publisher.
pub const PERMISSIONS: [&str; 6] = [
    "package_access",
    "package_manage",
    "package_push",
    "package_register",
    "package_release",
    "package_update",
];

/// Caveat payload requested by a client when asking for an ACL macaroon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRequest {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<AclPackage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPackage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
}

/// A scope caveat as it appeared on the token.
///
/// The raw text is authoritative; `request` is filled only when the text is
/// a JSON ACL request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclScope {
    pub raw: String,
    pub request: Option<AclRequest>,
}

impl AclScope {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            request: serde_json::from_str(raw).ok(),
        }
    }

    /// Whether the scope allows `permission`. Free-form scopes restrict nothing.
    pub fn allows(&self, permission: &str) -> bool {
        match &self.request {
            Some(req) if !req.permissions.is_empty() => {
                req.permissions.iter().any(|p| p == permission)
            }
            _ => true,
        }
    }

    /// Whether the scope allows acting on `package`.
    pub fn covers_package(&self, package: &str) -> bool {
        match self.request.as_ref().and_then(|r| r.packages.as_ref()) {
            Some(packages) => packages.iter().any(|p| p.name == package),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_request() {
        let scope = AclScope::parse(
            r#"{"permissions":["package_upload"],"packages":[{"name":"hello","series":"16"}]}"#,
        );
        let req = scope.request.as_ref().unwrap();
        assert_eq!(req.permissions, vec!["package_upload"]);
        assert!(req.channels.is_none());
        assert!(scope.allows("package_upload"));
        assert!(!scope.allows("package_release"));
        assert!(scope.covers_package("hello"));
        assert!(!scope.covers_package("other"));
    }

    #[test]
    fn test_free_form_scope() {
        let scope = AclScope::parse("package_upload");
        assert!(scope.request.is_none());
        assert_eq!(scope.raw, "package_upload");
        assert!(scope.allows("anything"));
        assert!(scope.covers_package("anything"));
    }

    #[test]
    fn test_request_serializes_compactly() {
        let req = AclRequest {
            permissions: vec!["package_access".into()],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"permissions":["package_access"]}"#
        );
    }
}
