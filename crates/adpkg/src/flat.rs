//! Single-file zip packages.
//!
//! Entry layout:
//!
//! ```text
//! [Content_Types].xml
//! adp/agent.yaml
//! acs/container.yaml      when present in the source tree
//! src/ eval/ tools/ metadata/
//! metadata/version.json   generated unless the source provides one
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use adp_schema::{AdpDocument, ADP_DOCUMENT_PATH};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::result::ZipError;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{PackageError, Result};
use crate::{layer, obs, source};

pub const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";
pub const CONTAINER_DESCRIPTOR_PATH: &str = "acs/container.yaml";
pub const VERSION_METADATA_PATH: &str = "metadata/version.json";

/// Source subtrees copied into the archive when present.
pub const PACKAGED_TREES: [&str; 4] = ["src", "eval", "tools", "metadata"];

/// `agent_version` recorded when the document carries no `version`.
pub const DEFAULT_AGENT_VERSION: &str = "0.1.0";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="yaml" ContentType="application/x-yaml"/>
  <Default Extension="json" ContentType="application/json"/>
  <Override PartName="/adp/agent.yaml" ContentType="application/vnd.adp.agent+yaml"/>
  <Override PartName="/acs/container.yaml" ContentType="application/vnd.adp.container+yaml"/>
</Types>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlatCompression {
    #[default]
    Deflated,
    Stored,
}

impl FlatCompression {
    fn method(self) -> CompressionMethod {
        match self {
            FlatCompression::Deflated => CompressionMethod::Deflated,
            FlatCompression::Stored => CompressionMethod::Stored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatArchiveOptions {
    pub compression: FlatCompression,
    /// Write `metadata/version.json` when the source tree has none.
    pub generate_metadata: bool,
}

impl Default for FlatArchiveOptions {
    fn default() -> Self {
        Self {
            compression: FlatCompression::default(),
            generate_metadata: true,
        }
    }
}

/// Generated `metadata/version.json`.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct VersionMetadata {
    pub agent_id: String,
    pub agent_version: String,
    pub spec_version: String,
    /// RFC 3339, UTC.
    pub build_timestamp: String,
}

impl VersionMetadata {
    pub fn for_document(document: &AdpDocument) -> Self {
        let agent_version = document
            .extra
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_AGENT_VERSION)
            .to_string();
        Self {
            agent_id: document.id.clone(),
            agent_version,
            spec_version: document.adp_version.clone(),
            build_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// What a successful flat build wrote.
#[derive(Debug, Clone)]
pub struct FlatArchive {
    pub path: PathBuf,
    /// Entry names in archive order.
    pub entries: Vec<String>,
    pub document: AdpDocument,
}

/// Build `out_path` from `source_dir` with default options.
pub fn build_flat_archive(source_dir: &Path, out_path: &Path) -> Result<FlatArchive> {
    build_flat_archive_with(source_dir, out_path, &FlatArchiveOptions::default())
}

/// Validate `source_dir`'s ADP document and write it and its companion trees
/// to the zip file `out_path`. Nothing is written if validation fails.
pub fn build_flat_archive_with(
    source_dir: &Path,
    out_path: &Path,
    options: &FlatArchiveOptions,
) -> Result<FlatArchive> {
    let source = source::load_source_document(source_dir)?;

    let mut files: Vec<(String, Vec<u8>)> = vec![
        (CONTENT_TYPES_ENTRY.to_string(), CONTENT_TYPES_XML.as_bytes().to_vec()),
        (ADP_DOCUMENT_PATH.to_string(), source.text.into_bytes()),
    ];
    let container = source_dir.join(CONTAINER_DESCRIPTOR_PATH);
    if container.is_file() {
        let data = std::fs::read(&container).map_err(PackageError::io(&container))?;
        files.push((CONTAINER_DESCRIPTOR_PATH.to_string(), data));
    }
    for tree in PACKAGED_TREES {
        let dir = source_dir.join(tree);
        if !dir.is_dir() {
            continue;
        }
        for entry in layer::collect_entries(&dir, &[])? {
            files.push((format!("{tree}/{}", entry.name), entry.data));
        }
    }
    if options.generate_metadata && !files.iter().any(|(name, _)| name == VERSION_METADATA_PATH) {
        let metadata = VersionMetadata::for_document(&source.document);
        files.push((
            VERSION_METADATA_PATH.to_string(),
            serde_json::to_vec_pretty(&metadata)?,
        ));
    }

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(PackageError::io(parent))?;
    }
    write_zip(out_path, &files, options.compression)?;

    let entries: Vec<String> = files.into_iter().map(|(name, _)| name).collect();
    obs::emit_flat_archive_built(&source.document.id, out_path, entries.len());
    Ok(FlatArchive {
        path: out_path.to_path_buf(),
        entries,
        document: source.document,
    })
}

fn write_zip(out_path: &Path, files: &[(String, Vec<u8>)], compression: FlatCompression) -> Result<()> {
    let file = File::create(out_path).map_err(PackageError::io(out_path))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(compression.method())
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (name, data) in files {
        zip.start_file(name.as_str(), options)
            .map_err(|e| zip_error(out_path, e))?;
        zip.write_all(data).map_err(PackageError::io(out_path))?;
    }
    zip.finish().map_err(|e| zip_error(out_path, e))?;
    Ok(())
}

/// Read the ADP document from a flat archive.
pub fn open_flat_archive(pkg_path: &Path) -> Result<AdpDocument> {
    let mut archive = open_zip(pkg_path)?;
    let mut entry = archive.by_name(ADP_DOCUMENT_PATH).map_err(|e| match e {
        ZipError::FileNotFound => PackageError::MissingDocument {
            path: ADP_DOCUMENT_PATH.to_string(),
        },
        other => zip_error(pkg_path, other),
    })?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| PackageError::format(format!("unreadable {ADP_DOCUMENT_PATH}: {e}")))?;

    let document = AdpDocument::from_yaml_str(&text)
        .map_err(|e| PackageError::format(format!("{ADP_DOCUMENT_PATH} is malformed: {e}")))?;
    obs::emit_flat_archive_opened(&document.id, pkg_path);
    Ok(document)
}

/// Extract every entry of a flat archive into `out_dir`.
pub fn unpack_flat_archive(pkg_path: &Path, out_dir: &Path) -> Result<()> {
    let mut archive = open_zip(pkg_path)?;
    std::fs::create_dir_all(out_dir).map_err(PackageError::io(out_dir))?;
    archive.extract(out_dir).map_err(|e| zip_error(out_dir, e))
}

/// Entry names of a flat archive, in archive order.
pub fn list_flat_entries(pkg_path: &Path) -> Result<Vec<String>> {
    let archive = open_zip(pkg_path)?;
    Ok(archive.file_names().map(str::to_string).collect::<Vec<_>>())
}

fn open_zip(pkg_path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(pkg_path).map_err(PackageError::io(pkg_path))?;
    ZipArchive::new(file).map_err(|e| zip_error(pkg_path, e))
}

fn zip_error(path: &Path, err: ZipError) -> PackageError {
    match err {
        ZipError::Io(source) => PackageError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => PackageError::format(format!("{}: {other}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(extra_version: Option<&str>) -> AdpDocument {
        let mut text = String::from(
            "adp_version: \"0.2.0\"\nid: agent.flat\nruntime:\n  execution:\n    - backend: custom\n      id: c\n",
        );
        if let Some(v) = extra_version {
            text.push_str(&format!("version: \"{v}\"\n"));
        }
        AdpDocument::from_yaml_str(&text).unwrap()
    }

    #[test]
    fn test_metadata_defaults_agent_version() {
        let meta = VersionMetadata::for_document(&document(None));
        assert_eq!(meta.agent_id, "agent.flat");
        assert_eq!(meta.agent_version, DEFAULT_AGENT_VERSION);
        assert_eq!(meta.spec_version, "0.2.0");
        assert!(chrono::DateTime::parse_from_rfc3339(&meta.build_timestamp).is_ok());
    }

    #[test]
    fn test_metadata_uses_document_version() {
        let meta = VersionMetadata::for_document(&document(Some("1.4.2")));
        assert_eq!(meta.agent_version, "1.4.2");
    }

    #[test]
    fn test_default_options() {
        let options = FlatArchiveOptions::default();
        assert_eq!(options.compression, FlatCompression::Deflated);
        assert!(options.generate_metadata);
    }

    #[test]
    fn test_not_a_zip_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.adpkg");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let err = open_flat_archive(&path).unwrap_err();
        assert!(err.is_format_error(), "{err}");
    }

    #[test]
    fn test_missing_archive_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_flat_archive(&dir.path().join("absent.adpkg")).unwrap_err();
        assert!(matches!(err, PackageError::Io { .. }), "{err}");
    }
}
