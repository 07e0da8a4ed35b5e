//! Typed assertions.
//!
//! Each assertion kind is a fixed set of typed fields. Conversion to and
//! from the generic [`Headers`] bag happens only when a document is signed
//! or decoded.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::crypto::PublicKey;
use crate::digest::Sha3_384Hash;
use crate::document::{Headers, SignedDocument, AUTHORITY_HEADER, TYPE_HEADER};
use crate::error::AssertionError;
use crate::types::{AccountId, KeyId, SnapId, Validation};

/// The assertion kinds the store issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionType {
    Account,
    AccountKey,
    SnapDeclaration,
    SnapRevision,
    Serial,
}

impl AssertionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::AccountKey => "account-key",
            Self::SnapDeclaration => "snap-declaration",
            Self::SnapRevision => "snap-revision",
            Self::Serial => "serial",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, AssertionError> {
        match name {
            "account" => Ok(Self::Account),
            "account-key" => Ok(Self::AccountKey),
            "snap-declaration" => Ok(Self::SnapDeclaration),
            "snap-revision" => Ok(Self::SnapRevision),
            "serial" => Ok(Self::Serial),
            other => Err(AssertionError::UnknownType(other.to_string())),
        }
    }
}

/// Who an account is and how much the store vouches for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAssertion {
    pub authority_id: AccountId,
    pub account_id: AccountId,
    pub username: String,
    pub display_name: Option<String>,
    pub validation: Validation,
    pub timestamp: DateTime<Utc>,
}

/// Binds a public key to an account for a validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeyAssertion {
    pub authority_id: AccountId,
    pub account_id: AccountId,
    pub name: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub public_key: PublicKey,
}

impl AccountKeyAssertion {
    /// `public-key-sha3-384` is always derived from the key itself.
    pub fn public_key_id(&self) -> KeyId {
        self.public_key.key_id()
    }
}

/// Binds a snap name and id to its publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapDeclarationAssertion {
    pub authority_id: AccountId,
    pub series: String,
    pub snap_id: SnapId,
    pub publisher_id: AccountId,
    pub snap_name: String,
    pub revision: u64,
    pub timestamp: DateTime<Utc>,
}

/// Binds a specific binary (by digest and size) to a snap revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapRevisionAssertion {
    pub authority_id: AccountId,
    pub snap_sha3_384: Sha3_384Hash,
    pub snap_id: SnapId,
    pub snap_size: u64,
    pub snap_revision: u64,
    pub developer_id: AccountId,
    pub timestamp: DateTime<Utc>,
}

/// Device identity issued by a brand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialAssertion {
    pub authority_id: AccountId,
    pub brand_id: AccountId,
    pub model: String,
    pub serial: String,
    pub device_key: PublicKey,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assertion {
    Account(AccountAssertion),
    AccountKey(AccountKeyAssertion),
    SnapDeclaration(SnapDeclarationAssertion),
    SnapRevision(SnapRevisionAssertion),
    Serial(SerialAssertion),
}

impl Assertion {
    pub fn assertion_type(&self) -> AssertionType {
        match self {
            Self::Account(_) => AssertionType::Account,
            Self::AccountKey(_) => AssertionType::AccountKey,
            Self::SnapDeclaration(_) => AssertionType::SnapDeclaration,
            Self::SnapRevision(_) => AssertionType::SnapRevision,
            Self::Serial(_) => AssertionType::Serial,
        }
    }

    pub fn authority_id(&self) -> &AccountId {
        match self {
            Self::Account(a) => &a.authority_id,
            Self::AccountKey(a) => &a.authority_id,
            Self::SnapDeclaration(a) => &a.authority_id,
            Self::SnapRevision(a) => &a.authority_id,
            Self::Serial(a) => &a.authority_id,
        }
    }

    /// Headers (type first) and optional body for signing.
    pub fn to_parts(&self) -> (Headers, Option<Bytes>) {
        let headers = Headers::new()
            .with(TYPE_HEADER, self.assertion_type().as_str())
            .with(AUTHORITY_HEADER, self.authority_id().as_str());

        match self {
            Self::Account(a) => {
                let mut headers = headers
                    .with("account-id", a.account_id.as_str())
                    .with("username", a.username.as_str());
                if let Some(name) = a.display_name.as_deref().filter(|n| !n.is_empty()) {
                    headers.insert("display-name", name);
                }
                let headers = headers
                    .with("validation", a.validation.as_str())
                    .with("timestamp", format_time(&a.timestamp));
                (headers, None)
            }
            Self::AccountKey(a) => {
                let headers = headers
                    .with("account-id", a.account_id.as_str())
                    .with("name", a.name.as_str())
                    .with("public-key-sha3-384", a.public_key_id().as_str())
                    .with("since", format_time(&a.since))
                    .with("until", format_time(&a.until));
                (headers, Some(Bytes::from(a.public_key.encode())))
            }
            Self::SnapDeclaration(a) => {
                let headers = headers
                    .with("series", a.series.as_str())
                    .with("snap-id", a.snap_id.as_str())
                    .with("publisher-id", a.publisher_id.as_str())
                    .with("snap-name", a.snap_name.as_str())
                    .with("revision", a.revision.to_string())
                    .with("timestamp", format_time(&a.timestamp));
                (headers, None)
            }
            Self::SnapRevision(a) => {
                let headers = headers
                    .with("snap-sha3-384", a.snap_sha3_384.encode())
                    .with("snap-id", a.snap_id.as_str())
                    .with("snap-size", a.snap_size.to_string())
                    .with("snap-revision", a.snap_revision.to_string())
                    .with("developer-id", a.developer_id.as_str())
                    .with("timestamp", format_time(&a.timestamp));
                (headers, None)
            }
            Self::Serial(a) => {
                let headers = headers
                    .with("brand-id", a.brand_id.as_str())
                    .with("model", a.model.as_str())
                    .with("serial", a.serial.as_str())
                    .with("device-key-sha3-384", a.device_key.key_id().as_str())
                    .with("timestamp", format_time(&a.timestamp));
                (headers, Some(Bytes::from(a.device_key.encode())))
            }
        }
    }

    /// Recover the typed view of a decoded document.
    pub fn from_document(doc: &SignedDocument) -> Result<Self, AssertionError> {
        let h = doc.headers();
        let authority_id = AccountId::new(doc.authority_id()?);

        match AssertionType::from_name(doc.assertion_type()?)? {
            AssertionType::Account => Ok(Self::Account(AccountAssertion {
                authority_id,
                account_id: AccountId::new(h.require("account-id")?),
                username: h.require("username")?.to_string(),
                display_name: h.get("display-name").map(String::from),
                validation: h
                    .require("validation")?
                    .parse::<Validation>()
                    .map_err(|e| AssertionError::invalid("validation", e.to_string()))?,
                timestamp: parse_time(h, "timestamp")?,
            })),
            AssertionType::AccountKey => {
                let public_key = body_key(doc)?;
                let claimed = h.require("public-key-sha3-384")?;
                if claimed != public_key.key_id().as_str() {
                    return Err(AssertionError::invalid(
                        "public-key-sha3-384",
                        "does not match the key in the body",
                    ));
                }
                Ok(Self::AccountKey(AccountKeyAssertion {
                    authority_id,
                    account_id: AccountId::new(h.require("account-id")?),
                    name: h.require("name")?.to_string(),
                    since: parse_time(h, "since")?,
                    until: parse_time(h, "until")?,
                    public_key,
                }))
            }
            AssertionType::SnapDeclaration => Ok(Self::SnapDeclaration(SnapDeclarationAssertion {
                authority_id,
                series: h.require("series")?.to_string(),
                snap_id: SnapId::new(h.require("snap-id")?),
                publisher_id: AccountId::new(h.require("publisher-id")?),
                snap_name: h.require("snap-name")?.to_string(),
                revision: parse_number(h, "revision")?,
                timestamp: parse_time(h, "timestamp")?,
            })),
            AssertionType::SnapRevision => Ok(Self::SnapRevision(SnapRevisionAssertion {
                authority_id,
                snap_sha3_384: Sha3_384Hash::decode(h.require("snap-sha3-384")?)
                    .map_err(|e| AssertionError::invalid("snap-sha3-384", e.to_string()))?,
                snap_id: SnapId::new(h.require("snap-id")?),
                snap_size: parse_number(h, "snap-size")?,
                snap_revision: parse_number(h, "snap-revision")?,
                developer_id: AccountId::new(h.require("developer-id")?),
                timestamp: parse_time(h, "timestamp")?,
            })),
            AssertionType::Serial => {
                let device_key = body_key(doc)?;
                if h.require("device-key-sha3-384")? != device_key.key_id().as_str() {
                    return Err(AssertionError::invalid(
                        "device-key-sha3-384",
                        "does not match the key in the body",
                    ));
                }
                Ok(Self::Serial(SerialAssertion {
                    authority_id,
                    brand_id: AccountId::new(h.require("brand-id")?),
                    model: h.require("model")?.to_string(),
                    serial: h.require("serial")?.to_string(),
                    device_key,
                    timestamp: parse_time(h, "timestamp")?,
                }))
            }
        }
    }
}

impl AccountKeyAssertion {
    pub fn from_document(doc: &SignedDocument) -> Result<Self, AssertionError> {
        match Assertion::from_document(doc)? {
            Assertion::AccountKey(a) => Ok(a),
            other => Err(AssertionError::WrongType {
                expected: AssertionType::AccountKey.as_str(),
                actual: other.assertion_type().as_str().to_string(),
            }),
        }
    }
}

/// RFC 3339 with whole seconds and a `Z` suffix.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_time_str(name: &str, value: &str) -> Result<DateTime<Utc>, AssertionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AssertionError::invalid(name, e.to_string()))
}

fn parse_time(h: &Headers, name: &str) -> Result<DateTime<Utc>, AssertionError> {
    parse_time_str(name, h.require(name)?)
}

fn parse_number(h: &Headers, name: &str) -> Result<u64, AssertionError> {
    h.require(name)?
        .parse()
        .map_err(|_| AssertionError::invalid(name, "not an unsigned integer"))
}

fn body_key(doc: &SignedDocument) -> Result<PublicKey, AssertionError> {
    let body = doc
        .body()
        .ok_or_else(|| AssertionError::Malformed("key assertion without body".into()))?;
    let text = std::str::from_utf8(body)
        .map_err(|_| AssertionError::Malformed("key body is not UTF-8".into()))?;
    Ok(PublicKey::decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::digest::digest;

    fn sign(assertion: &Assertion, kp: &Keypair) -> SignedDocument {
        let (headers, body) = assertion.to_parts();
        SignedDocument::assemble(headers, body, &kp.key_id(), |m| Ok(kp.sign(m))).unwrap()
    }

    fn ts() -> DateTime<Utc> {
        parse_time_str("timestamp", "2015-11-20T15:04:00Z").unwrap()
    }

    #[test]
    fn test_account_headers() {
        let kp = Keypair::from_seed(&[7; 32]);
        let assertion = Assertion::Account(AccountAssertion {
            authority_id: AccountId::new("kebe-store"),
            account_id: AccountId::new("acct-1"),
            username: "alice".into(),
            display_name: None,
            validation: Validation::Certified,
            timestamp: ts(),
        });
        let doc = sign(&assertion, &kp);

        assert_eq!(doc.header("type"), Some("account"));
        assert_eq!(doc.header("validation"), Some("certified"));
        assert_eq!(doc.header("timestamp"), Some("2015-11-20T15:04:00Z"));
        assert!(doc.header("display-name").is_none());

        let decoded = SignedDocument::decode(&doc.encode()).unwrap();
        assert_eq!(Assertion::from_document(&decoded).unwrap(), assertion);
    }

    #[test]
    fn test_account_key_carries_key_in_body() {
        let signer = Keypair::from_seed(&[8; 32]);
        let subject = Keypair::from_seed(&[9; 32]);
        let assertion = Assertion::AccountKey(AccountKeyAssertion {
            authority_id: AccountId::new("kebe-store"),
            account_id: AccountId::new("acct-1"),
            name: "default".into(),
            since: ts(),
            until: parse_time_str("until", "2500-11-20T15:04:00Z").unwrap(),
            public_key: subject.public_key(),
        });
        let doc = sign(&assertion, &signer);

        assert_eq!(
            doc.header("public-key-sha3-384"),
            Some(subject.key_id().as_str())
        );
        let key = AccountKeyAssertion::from_document(&doc).unwrap();
        assert_eq!(key.public_key, subject.public_key());
    }

    #[test]
    fn test_snap_revision_uses_encoded_digest() {
        let kp = Keypair::generate();
        let d = digest(b"snap bytes");
        let assertion = Assertion::SnapRevision(SnapRevisionAssertion {
            authority_id: AccountId::new("kebe-store"),
            snap_sha3_384: Sha3_384Hash::decode(&d.encoded).unwrap(),
            snap_id: SnapId::new("snap-id-1"),
            snap_size: d.size,
            snap_revision: 3,
            developer_id: AccountId::new("acct-1"),
            timestamp: ts(),
        });
        let doc = sign(&assertion, &kp);

        assert_eq!(doc.header("snap-sha3-384"), Some(d.encoded.as_str()));
        assert_eq!(doc.header("snap-size"), Some("10"));
        assert_eq!(Assertion::from_document(&doc).unwrap(), assertion);
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let kp = Keypair::generate();
        let doc = sign(
            &Assertion::SnapDeclaration(SnapDeclarationAssertion {
                authority_id: AccountId::new("kebe-store"),
                series: "16".into(),
                snap_id: SnapId::new("id"),
                publisher_id: AccountId::new("acct-1"),
                snap_name: "hello".into(),
                revision: 1,
                timestamp: ts(),
            }),
            &kp,
        );
        assert!(matches!(
            AccountKeyAssertion::from_document(&doc),
            Err(AssertionError::WrongType { .. })
        ));
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            AssertionType::from_name("model"),
            Err(AssertionError::UnknownType(_))
        ));
    }
}
