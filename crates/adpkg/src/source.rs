//! Loading and validating the ADP document of a source tree.

use std::path::{Path, PathBuf};

use adp_schema::{AdpDocument, ADP_DOCUMENT_PATH};

use crate::error::{PackageError, Result};
use crate::obs;

/// A source tree's ADP document that passed validation.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// File contents exactly as read.
    pub text: String,
    pub document: AdpDocument,
}

/// Read `<source_dir>/adp/agent.yaml` and validate it.
///
/// Fails with [`PackageError::Io`] naming the expected path when the file is
/// missing, and with [`PackageError::Validation`] when it is not valid YAML or
/// violates the schema.
pub fn load_source_document(source_dir: &Path) -> Result<SourceDocument> {
    let path = source_dir.join(ADP_DOCUMENT_PATH);
    let text = std::fs::read_to_string(&path).map_err(PackageError::io(&path))?;

    let value = AdpDocument::parse_yaml_value(&text).map_err(|e| {
        obs::emit_validation_failed(&path, 1);
        PackageError::Validation {
            errors: vec![format!("{ADP_DOCUMENT_PATH} is not valid YAML: {e}")],
        }
    })?;

    let errors = adp_schema::validate(&value)?;
    if !errors.is_empty() {
        obs::emit_validation_failed(&path, errors.len());
        return Err(PackageError::Validation { errors });
    }

    let document = AdpDocument::decode(&value).map_err(|issue| {
        obs::emit_validation_failed(&path, 1);
        PackageError::Validation {
            errors: vec![issue.to_string()],
        }
    })?;
    Ok(SourceDocument {
        path,
        text,
        document,
    })
}
