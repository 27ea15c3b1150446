//! Error taxonomy for building and reading packages.

use std::path::{Path, PathBuf};

use adp_schema::SchemaError;

use crate::cas::CasError;

/// Errors surfaced by the OCI and flat packagers.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The ADP document failed schema or semantic validation. Nothing was written.
    #[error("ADP validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact on disk is structurally malformed.
    #[error("malformed package: {0}")]
    Format(String),

    #[error("malformed package: layer does not contain {path}")]
    MissingDocument { path: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PackageError {
    /// Closure mapping an `io::Error` to [`PackageError::Io`] at `path`.
    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> PackageError + '_ {
        move |source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        PackageError::Format(message.into())
    }

    /// True for every variant describing a malformed artifact.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PackageError::Format(_)
                | PackageError::MissingDocument { .. }
                | PackageError::DigestMismatch { .. }
        )
    }
}

impl From<CasError> for PackageError {
    fn from(err: CasError) -> Self {
        match err {
            CasError::Io { path, source } => PackageError::Io { path, source },
            CasError::NotFound(digest) => {
                PackageError::Format(format!("referenced blob {digest} is missing"))
            }
            CasError::Corrupt { expected, actual } => PackageError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            other @ (CasError::InvalidDigest(_) | CasError::UnsupportedAlgorithm(_)) => {
                PackageError::Format(other.to_string())
            }
        }
    }
}

/// Result type for packaging operations.
pub type Result<T> = std::result::Result<T, PackageError>;
