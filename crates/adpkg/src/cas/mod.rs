pub mod fs;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;

/// The only digest algorithm blobs are addressed by.
pub const ALGORITHM: &str = "sha256";

/// SHA-256 digest used as a blob address, rendered `sha256:<hex>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Compute the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the algorithm prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 bare lowercase hex characters (no algorithm prefix).
    pub fn from_hex(s: &str) -> Result<Self> {
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CasError::InvalidDigest(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| CasError::InvalidDigest(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(CasError::InvalidDigest(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ALGORITHM}:{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex().chars().take(12).collect::<String>())
    }
}

impl FromStr for Digest {
    type Err = CasError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| CasError::InvalidDigest(s.to_string()))?;
        if algorithm != ALGORITHM {
            return Err(CasError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        Self::from_hex(hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Address and length of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub digest: Digest,
    pub size: u64,
}

impl BlobRef {
    pub fn of(data: &[u8]) -> Self {
        Self {
            digest: Digest::compute(data),
            size: data.len() as u64,
        }
    }
}

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob not found: {0}")]
    NotFound(Digest),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("corrupt blob: expected {expected}, got {actual}")]
    Corrupt { expected: Digest, actual: Digest },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Content-addressed blob store interface.
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its address. Storing the same bytes twice is a no-op.
    fn put(&self, data: &[u8]) -> Result<BlobRef>;

    /// Retrieve the blob for `digest`.
    fn get(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Check whether `digest` exists without reading the blob.
    fn exists(&self, digest: &Digest) -> Result<bool>;

    /// Retrieve the blob and check that its bytes hash to `digest`.
    fn get_verified(&self, digest: &Digest) -> Result<Vec<u8>> {
        let data = self.get(digest)?;
        let actual = Digest::compute(&data);
        if actual != *digest {
            return Err(CasError::Corrupt {
                expected: *digest,
                actual,
            });
        }
        Ok(data)
    }
}
