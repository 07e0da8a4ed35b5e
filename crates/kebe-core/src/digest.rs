//! SHA3-384 content digests.
//!
//! Snaps are content addressed. The raw form of a digest (lowercase hex) is
//! the revision lookup key; the encoded form (unpadded URL-safe base64 of the
//! 48 digest bytes) is what appears in assertion headers such as
//! `snap-sha3-384` and `public-key-sha3-384`.

use std::fmt;
use std::io::{self, Read, Write};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_384};

use crate::error::CoreError;

/// Length of a SHA3-384 digest in bytes.
pub const DIGEST_LEN: usize = 48;

/// Read buffer used when digesting from a reader.
pub const READ_BUF_SIZE: usize = 2 * 1024 * 1024;

/// A 48-byte SHA3-384 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha3_384Hash(pub [u8; DIGEST_LEN]);

impl Sha3_384Hash {
    /// Compute the SHA3-384 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&Sha3_384::digest(data));
        Self(out)
    }

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex, the raw digest form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the raw (hex) form.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidDigest(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// The encoded form used inside assertion headers.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Parse the encoded form. Anything that does not decode to exactly
    /// 48 bytes is rejected.
    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CoreError::InvalidDigest(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            CoreError::InvalidDigest(format!(
                "expected {} bytes, got {}",
                DIGEST_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Sha3_384Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha3_384({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Sha3_384Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Digest of a snap: both textual forms plus the number of bytes hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapDigest {
    /// Lowercase hex SHA3-384.
    pub raw: String,
    /// Unpadded URL-safe base64 SHA3-384.
    pub encoded: String,
    /// Byte count.
    pub size: u64,
}

impl SnapDigest {
    pub fn from_hash(hash: &Sha3_384Hash, size: u64) -> Self {
        Self {
            raw: hash.to_hex(),
            encoded: hash.encode(),
            size,
        }
    }
}

/// Incremental SHA3-384 over a byte stream.
///
/// Feeding the same bytes in any chunking yields the same [`SnapDigest`]
/// as [`digest`] over the whole buffer.
#[derive(Clone, Default)]
pub struct StreamingDigest {
    hasher: Sha3_384,
    size: u64,
}

impl StreamingDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn finalize(self) -> SnapDigest {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&self.hasher.finalize());
        SnapDigest::from_hash(&Sha3_384Hash(out), self.size)
    }
}

impl Write for StreamingDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest an in-memory buffer.
pub fn digest(bytes: &[u8]) -> SnapDigest {
    let mut state = StreamingDigest::new();
    state.update(bytes);
    state.finalize()
}

/// Digest everything a reader yields.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<SnapDigest> {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut state = StreamingDigest::new();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        state.update(&buf[..n]);
    }
    Ok(state.finalize())
}
