//! Wire form of signed assertions.
//!
//! ```text
//! type: account-key
//! authority-id: kebe-store
//! ...
//! sign-key-sha3-384: <key id>
//! body-length: <n>
//!
//! <body>
//!
//! <base64 signature>
//! ```
//!
//! The body and its surrounding blank line are present only when
//! `body-length` is. The signature covers every byte before the final
//! blank line. Header values are single-line.

use bytes::Bytes;

use crate::crypto::{PublicKey, Signature};
use crate::error::AssertionError;
use crate::types::KeyId;

/// Content type for encoded assertions.
pub const MEDIA_TYPE: &str = "application/x.ubuntu.assertion";

pub const TYPE_HEADER: &str = "type";
pub const AUTHORITY_HEADER: &str = "authority-id";
pub const SIGN_KEY_HEADER: &str = "sign-key-sha3-384";
pub const BODY_LENGTH_HEADER: &str = "body-length";

const SEPARATOR: &[u8] = b"\n\n";

/// Ordered header bag. Only used at the serialization boundary; typed
/// assertions live in [`crate::assertion`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str, AssertionError> {
        self.get(name)
            .ok_or_else(|| AssertionError::MissingHeader(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
        }
    }

    fn decode(text: &str) -> Result<Self, AssertionError> {
        let mut headers = Headers::new();
        for line in text.split('\n') {
            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| AssertionError::Malformed(format!("bad header line {:?}", line)))?;
            validate_name(name)?;
            if headers.get(name).is_some() {
                return Err(AssertionError::Malformed(format!("repeated header {:?}", name)));
            }
            headers.0.push((name.to_string(), value.to_string()));
        }
        Ok(headers)
    }
}

fn validate_name(name: &str) -> Result<(), AssertionError> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(AssertionError::Malformed(format!("bad header name {:?}", name)))
    }
}

fn validate_value(name: &str, value: &str) -> Result<(), AssertionError> {
    if value.contains('\n') {
        return Err(AssertionError::invalid(name, "multi-line values are not supported"));
    }
    Ok(())
}

/// A signed assertion as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    headers: Headers,
    body: Option<Bytes>,
    signature: Signature,
}

impl SignedDocument {
    /// Sign `headers` and `body` with `sign`, which receives the content
    /// bytes. `sign-key-sha3-384` and `body-length` are filled in here.
    pub fn assemble<F>(
        mut headers: Headers,
        body: Option<Bytes>,
        key_id: &KeyId,
        sign: F,
    ) -> Result<Self, AssertionError>
    where
        F: FnOnce(&[u8]) -> Result<Signature, AssertionError>,
    {
        headers.insert(SIGN_KEY_HEADER, key_id.as_str());
        match &body {
            Some(b) => headers.insert(BODY_LENGTH_HEADER, b.len().to_string()),
            None => {
                headers.remove(BODY_LENGTH_HEADER);
            }
        }

        if headers.iter().next().map(|(n, _)| n) != Some(TYPE_HEADER) {
            return Err(AssertionError::Malformed("type must be the first header".into()));
        }
        for (name, value) in headers.iter() {
            validate_name(name)?;
            validate_value(name, value)?;
        }

        let mut doc = Self {
            headers,
            body,
            signature: Signature::from_bytes([0u8; 64]),
        };
        doc.signature = sign(&doc.content())?;
        Ok(doc)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn assertion_type(&self) -> Result<&str, AssertionError> {
        self.headers.require(TYPE_HEADER)
    }

    pub fn authority_id(&self) -> Result<&str, AssertionError> {
        self.headers.require(AUTHORITY_HEADER)
    }

    pub fn sign_key_id(&self) -> Result<KeyId, AssertionError> {
        self.headers.require(SIGN_KEY_HEADER).map(KeyId::new)
    }

    /// The signed bytes: headers, plus blank line and body when present.
    pub fn content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.headers.encode_into(&mut out);
        if let Some(body) = &self.body {
            out.extend_from_slice(SEPARATOR);
            out.extend_from_slice(body);
        }
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.content();
        out.extend_from_slice(SEPARATOR);
        out.extend_from_slice(self.signature.encode().as_bytes());
        out.push(b'\n');
        out
    }

    /// Parse an encoded assertion. Structure only; signatures are checked
    /// by [`verify_signature`](Self::verify_signature) or a trust chain.
    pub fn decode(input: &[u8]) -> Result<Self, AssertionError> {
        let header_end = find(input, SEPARATOR)
            .ok_or_else(|| AssertionError::Malformed("missing header terminator".into()))?;
        let header_text = std::str::from_utf8(&input[..header_end])
            .map_err(|_| AssertionError::Malformed("headers are not UTF-8".into()))?;
        let headers = Headers::decode(header_text)?;

        if headers.iter().next().map(|(n, _)| n) != Some(TYPE_HEADER) {
            return Err(AssertionError::Malformed("type must be the first header".into()));
        }
        headers.require(SIGN_KEY_HEADER)?;

        let mut rest = &input[header_end + SEPARATOR.len()..];

        let body = match headers.get(BODY_LENGTH_HEADER) {
            Some(len) => {
                let len: usize = len
                    .parse()
                    .map_err(|_| AssertionError::invalid(BODY_LENGTH_HEADER, "not a number"))?;
                let body_end = len
                    .checked_add(SEPARATOR.len())
                    .filter(|end| rest.get(len..*end) == Some(SEPARATOR))
                    .ok_or_else(|| {
                        AssertionError::Malformed("body does not match body-length".into())
                    })?;
                let body = Bytes::copy_from_slice(&rest[..len]);
                rest = &rest[body_end..];
                Some(body)
            }
            None => None,
        };

        let sig_text = std::str::from_utf8(rest)
            .map_err(|_| AssertionError::Malformed("signature is not UTF-8".into()))?;
        let sig_text = sig_text.strip_suffix('\n').unwrap_or(sig_text);
        if sig_text.is_empty() || sig_text.contains('\n') {
            return Err(AssertionError::Malformed("bad signature block".into()));
        }
        let signature = Signature::decode(sig_text)?;

        Ok(Self {
            headers,
            body,
            signature,
        })
    }

    pub fn verify_signature(&self, key: &PublicKey) -> Result<(), AssertionError> {
        key.verify(&self.content(), &self.signature)
            .map_err(|_| AssertionError::SignatureFailed)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use proptest::prelude::*;

    fn signed(headers: Headers, body: Option<&'static [u8]>, kp: &Keypair) -> SignedDocument {
        SignedDocument::assemble(headers, body.map(Bytes::from_static), &kp.key_id(), |msg| {
            Ok(kp.sign(msg))
        })
        .unwrap()
    }

    fn sample_headers() -> Headers {
        Headers::new()
            .with("type", "account")
            .with("authority-id", "kebe-store")
            .with("account-id", "acct-1")
    }

    #[test]
    fn test_encode_decode_without_body() {
        let kp = Keypair::from_seed(&[1; 32]);
        let doc = signed(sample_headers(), None, &kp);
        let decoded = SignedDocument::decode(&doc.encode()).unwrap();

        assert_eq!(decoded, doc);
        assert!(decoded.header(BODY_LENGTH_HEADER).is_none());
        decoded.verify_signature(&kp.public_key()).unwrap();
    }

    #[test]
    fn test_encode_decode_with_body() {
        let kp = Keypair::from_seed(&[2; 32]);
        let doc = signed(sample_headers(), Some(b"line one\n\nline two"), &kp);
        let encoded = doc.encode();
        let decoded = SignedDocument::decode(&encoded).unwrap();

        assert_eq!(decoded.body().map(|b| &b[..]), Some(&b"line one\n\nline two"[..]));
        assert_eq!(decoded.header(BODY_LENGTH_HEADER), Some("18"));
        decoded.verify_signature(&kp.public_key()).unwrap();
    }

    #[test]
    fn test_tampered_header_fails_signature() {
        let kp = Keypair::from_seed(&[3; 32]);
        let encoded = signed(sample_headers(), None, &kp).encode();
        let text = String::from_utf8(encoded).unwrap().replace("acct-1", "acct-2");
        let decoded = SignedDocument::decode(text.as_bytes()).unwrap();
        assert!(matches!(
            decoded.verify_signature(&kp.public_key()),
            Err(AssertionError::SignatureFailed)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SignedDocument::decode(b"").is_err());
        assert!(SignedDocument::decode(b"type: account\n\n").is_err());
        assert!(SignedDocument::decode(b"authority-id: x\nsign-key-sha3-384: k\n\nAAAA").is_err());
        assert!(SignedDocument::decode(b"type account\n\nAAAA").is_err());
    }

    #[test]
    fn test_decode_rejects_body_length_out_of_range() {
        for len in ["18446744073709551615", "18446744073709551614", "1000", "3"] {
            let input = format!(
                "type: account\nsign-key-sha3-384: k\nbody-length: {}\n\nAAAA",
                len
            );
            assert!(
                matches!(
                    SignedDocument::decode(input.as_bytes()),
                    Err(AssertionError::Malformed(_))
                ),
                "{}",
                len
            );
        }
    }

    #[test]
    fn test_assemble_rejects_multiline_value() {
        let kp = Keypair::generate();
        let headers = sample_headers().with("display-name", "two\nlines");
        let err = SignedDocument::assemble(headers, None, &kp.key_id(), |m| Ok(kp.sign(m)));
        assert!(matches!(err, Err(AssertionError::InvalidHeader { .. })));
    }

    #[test]
    fn test_headers_preserve_order() {
        let mut headers = sample_headers();
        headers.insert("type", "account-key");
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["type", "authority-id", "account-id"]);
        assert_eq!(headers.get("type"), Some("account-key"));
    }

    proptest! {
        #[test]
        fn decode_never_panics_on_body_length(
            len in any::<u64>(),
            tail in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut input = format!(
                "type: account\nsign-key-sha3-384: k\nbody-length: {}\n\n",
                len
            )
            .into_bytes();
            input.extend_from_slice(&tail);
            let _ = SignedDocument::decode(&input);
        }
    }
}
