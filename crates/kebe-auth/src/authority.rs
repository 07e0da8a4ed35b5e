//! Minting and verifying the store's root/discharge capability pair.

use macaroon::{ByteString, Caveat, Format, Macaroon, MacaroonError, MacaroonKey, Verifier};
use serde::Deserialize;

use crate::acl::AclScope;
use crate::error::{AuthError, Result};
use crate::identity::IdentityProvider;

/// First-party caveat placed on root macaroons that carry no ACL payload.
pub const UNSCOPED_CAVEAT: &str = "is-authorized-or-whatever";

const EMAIL_CAVEAT_PREFIX: &str = "email=";
const HEADER_SCHEME: &str = "Macaroon";

/// Secrets and identifiers for minting macaroons.
#[derive(Clone, Deserialize)]
pub struct MacaroonSecrets {
    pub root_key: String,
    pub root_id: String,
    pub root_location: String,
    pub discharge_key: String,
    pub third_party_caveat_id: String,
    pub third_party_location: String,
}

impl std::fmt::Debug for MacaroonSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacaroonSecrets")
            .field("root_id", &self.root_id)
            .field("root_location", &self.root_location)
            .field("third_party_location", &self.third_party_location)
            .finish_non_exhaustive()
    }
}

/// What a verified header proves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCapability {
    /// Email asserted by the discharge.
    pub email: String,
    /// Scope requested when the root was minted, if any.
    pub acl: Option<AclScope>,
}

/// The raw `root` and `discharge` tokens of an authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub root: String,
    pub discharge: String,
}

impl AuthorizationHeader {
    /// Parse `Macaroon root=<b64>, discharge=<b64>`.
    pub fn parse(header: &str) -> Result<Self> {
        let params = header
            .trim()
            .strip_prefix(HEADER_SCHEME)
            .ok_or_else(|| AuthError::MalformedHeader("expected Macaroon scheme".into()))?;

        let mut root = None;
        let mut discharge = None;
        for part in params.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| AuthError::MalformedHeader(format!("bad parameter {:?}", part)))?;
            let slot = match name.trim() {
                "root" => &mut root,
                "discharge" => &mut discharge,
                other => {
                    return Err(AuthError::MalformedHeader(format!(
                        "unknown parameter {:?}",
                        other
                    )))
                }
            };
            if slot.replace(value.trim().to_string()).is_some() {
                return Err(AuthError::MalformedHeader(format!("duplicate {}", name)));
            }
        }

        match (root, discharge) {
            (Some(root), Some(discharge)) if !root.is_empty() && !discharge.is_empty() => {
                Ok(Self { root, discharge })
            }
            _ => Err(AuthError::MalformedHeader(
                "root and discharge are both required".into(),
            )),
        }
    }
}

impl std::fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} root={}, discharge={}",
            HEADER_SCHEME, self.root, self.discharge
        )
    }
}

/// Bind a serialized discharge to a serialized root, as a client does
/// before sending them.
pub fn bind_discharge(root: &str, discharge: &str) -> Result<String> {
    initialize()?;
    let root = decode(root)?;
    let mut discharge = decode(discharge)?;
    root.bind(&mut discharge);
    encode(&discharge)
}

/// Mints and verifies the store's macaroons.
#[derive(Debug, Clone)]
pub struct MacaroonAuthority {
    secrets: MacaroonSecrets,
}

impl MacaroonAuthority {
    pub fn new(secrets: MacaroonSecrets) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &MacaroonSecrets {
        &self.secrets
    }

    fn mint_root(&self, payload: &str) -> Result<Macaroon> {
        let s = &self.secrets;
        let mut root = Macaroon::create(
            Some(s.root_location.clone()),
            &MacaroonKey::generate(s.root_key.as_bytes()),
            s.root_id.as_str().into(),
        )
        .map_err(minting)?;
        root.add_third_party_caveat(
            &s.third_party_location,
            &MacaroonKey::generate(s.discharge_key.as_bytes()),
            s.third_party_caveat_id.as_str().into(),
        );
        let scope = if payload.is_empty() {
            UNSCOPED_CAVEAT
        } else {
            payload
        };
        root.add_first_party_caveat(scope.into());
        Ok(root)
    }

    /// Mint a root macaroon carrying `payload` as its ACL scope.
    pub fn issue_acl(&self, payload: &str) -> Result<String> {
        initialize()?;
        let root = self.mint_root(payload)?;
        tracing::debug!(scoped = !payload.is_empty(), "issued root macaroon");
        encode(&root)
    }

    /// Mint an (unbound) discharge for `caveat_id` once the identity
    /// provider accepts the credentials.
    pub async fn issue_discharge<P: IdentityProvider + ?Sized>(
        &self,
        provider: &P,
        username: &str,
        credential: &str,
        caveat_id: &str,
    ) -> Result<String> {
        let identity = provider.verify_credentials(username, credential).await?;

        initialize()?;
        let mut discharge = Macaroon::create(
            Some(self.secrets.third_party_location.clone()),
            &MacaroonKey::generate(self.secrets.discharge_key.as_bytes()),
            caveat_id.into(),
        )
        .map_err(minting)?;
        let caveat = format!("{}{}", EMAIL_CAVEAT_PREFIX, identity.email);
        discharge.add_first_party_caveat(caveat.as_str().into());
        tracing::debug!(username, "issued discharge macaroon");
        encode(&discharge)
    }

    /// Verify an authorization header and extract what it proves.
    ///
    /// The discharge must be bound to the root. First-party caveats are not
    /// enforced here; the email and scope they carry are returned instead.
    pub fn verify(&self, header: &str) -> Result<VerifiedCapability> {
        initialize()?;
        let header = AuthorizationHeader::parse(header)?;
        let root = decode(&header.root)?;
        let discharge = decode(&header.discharge)?;

        let mut verifier = Verifier::default();
        verifier.satisfy_general(any_caveat);
        verifier
            .verify(
                &root,
                &MacaroonKey::generate(self.secrets.root_key.as_bytes()),
                vec![discharge.clone()],
            )
            .map_err(|e| AuthError::Verification(format!("{:?}", e)))?;

        let email = email_from_discharge(&discharge)?;
        let acl = first_party_predicates(&root)
            .into_iter()
            .find(|c| c != UNSCOPED_CAVEAT)
            .map(|c| AclScope::parse(&c));

        Ok(VerifiedCapability { email, acl })
    }
}

fn any_caveat(_: &ByteString) -> bool {
    true
}

fn initialize() -> Result<()> {
    macaroon::initialize().map_err(minting)
}

fn minting(e: MacaroonError) -> AuthError {
    AuthError::Minting(format!("{:?}", e))
}

/// Unpadded URL-safe base64 of the v2 binary form.
fn encode(m: &Macaroon) -> Result<String> {
    let text = m.serialize(Format::V2).map_err(minting)?;
    Ok(text.trim_end_matches('=').to_string())
}

fn decode(text: &str) -> Result<Macaroon> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AuthError::MalformedToken("empty token".into()));
    }
    Macaroon::deserialize(text).map_err(|e| AuthError::MalformedToken(format!("{:?}", e)))
}

fn first_party_predicates(m: &Macaroon) -> Vec<String> {
    m.caveats()
        .into_iter()
        .filter_map(|c| match c {
            Caveat::FirstParty(fp) => std::str::from_utf8(&fp.predicate().0)
                .ok()
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn email_from_discharge(discharge: &Macaroon) -> Result<String> {
    let predicates = first_party_predicates(discharge);
    let email = predicates
        .iter()
        .find_map(|c| c.strip_prefix(EMAIL_CAVEAT_PREFIX))
        .ok_or(AuthError::MissingEmailCaveat)?;

    if email.is_empty() || email.contains('=') {
        return Err(AuthError::MalformedEmailCaveat(email.to_string()));
    }
    Ok(email.to_string())
}
