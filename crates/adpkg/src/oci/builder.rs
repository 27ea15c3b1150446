//! Writes an ADP source tree as an OCI image layout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use adp_schema::{AdpDocument, ADP_DOCUMENT_PATH};

use super::{
    Descriptor, ImageLayout, Index, Manifest, PackageConfig, ADP_VERSION_ANNOTATION,
    CONFIG_MEDIA_TYPE, INDEX_FILE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, OCI_LAYOUT_FILE,
    TITLE_ANNOTATION,
};
use crate::cas::fs::FsBlobStore;
use crate::cas::{BlobRef, BlobStore};
use crate::error::{PackageError, Result};
use crate::obs::{self, PackageSpan};
use crate::{layer, source};

/// Options for [`PackageBuilder`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Paths relative to the source tree left out of the layer. The output
    /// directory is always left out when it lies inside the source tree.
    pub exclude: Vec<PathBuf>,
    /// Extra annotations on the index's manifest descriptor.
    pub annotations: BTreeMap<String, String>,
}

/// What a successful build wrote.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub out_dir: PathBuf,
    pub manifest: BlobRef,
    pub config: BlobRef,
    pub layer: BlobRef,
    pub document: AdpDocument,
}

#[derive(Debug, Clone, Default)]
pub struct PackageBuilder {
    options: BuildOptions,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Validate `source_dir`'s ADP document and write the package to `out_dir`.
    ///
    /// Nothing is created under `out_dir` unless the document loads and
    /// validates, and no blob is written unless the layer carries the
    /// validated document. Rebuilding into the same directory reuses
    /// unchanged blobs.
    pub fn build(&self, source_dir: &Path, out_dir: &Path) -> Result<BuiltPackage> {
        let source = source::load_source_document(source_dir)?;
        let document = source.document;
        let _span = PackageSpan::enter(&document.id);
        obs::emit_build_started(&document.id, source_dir);

        std::fs::create_dir_all(out_dir).map_err(PackageError::io(out_dir))?;
        let exclude = self.layer_exclusions(source_dir, out_dir)?;
        let entries = layer::collect_entries(source_dir, &exclude)?;
        ensure_document_in_layer(&entries, &source.text)?;
        let store = FsBlobStore::new(out_dir);

        let config = PackageConfig {
            agent_id: document.id.clone(),
            adp_version: document.adp_version.clone(),
        };
        let config = store.put(&serde_json::to_vec(&config)?)?;

        let layer = store.put(&layer::build_archive(&entries)?)?;

        let manifest = Manifest::new(
            Descriptor::new(CONFIG_MEDIA_TYPE, config),
            Descriptor::new(LAYER_MEDIA_TYPE, layer),
        );
        let manifest = store.put(&serde_json::to_vec_pretty(&manifest)?)?;

        let index = Index::new(
            Descriptor::new(MANIFEST_MEDIA_TYPE, manifest)
                .with_annotations(self.index_annotations(&document)),
        );
        write_json(&out_dir.join(INDEX_FILE), &index)?;
        write_json(&out_dir.join(OCI_LAYOUT_FILE), &ImageLayout::default())?;

        obs::emit_build_finished(&document.id, &manifest.digest, layer.size);
        Ok(BuiltPackage {
            out_dir: out_dir.to_path_buf(),
            manifest,
            config,
            layer,
            document,
        })
    }

    fn index_annotations(&self, document: &AdpDocument) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(TITLE_ANNOTATION.to_string(), document.id.clone());
        annotations.insert(
            ADP_VERSION_ANNOTATION.to_string(),
            document.adp_version.clone(),
        );
        for (key, value) in &self.options.annotations {
            annotations.entry(key.clone()).or_insert_with(|| value.clone());
        }
        annotations
    }

    /// Configured exclusions plus `out_dir` when it is inside `source_dir`.
    fn layer_exclusions(&self, source_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut exclude = self.options.exclude.clone();
        let source = source_dir
            .canonicalize()
            .map_err(PackageError::io(source_dir))?;
        let out = out_dir.canonicalize().map_err(PackageError::io(out_dir))?;
        if let Ok(rel) = out.strip_prefix(&source) {
            if rel.as_os_str().is_empty() {
                return Err(PackageError::format(format!(
                    "output directory {} is the source directory",
                    out_dir.display()
                )));
            }
            exclude.push(rel.to_path_buf());
        }
        Ok(exclude)
    }
}

/// The layer must hold the same `adp/agent.yaml` that was validated, or the
/// package could never be opened.
fn ensure_document_in_layer(entries: &[layer::LayerEntry], text: &str) -> Result<()> {
    match entries.iter().find(|e| e.name == ADP_DOCUMENT_PATH) {
        Some(entry) if entry.data == text.as_bytes() => Ok(()),
        Some(_) => Err(PackageError::format(format!(
            "{ADP_DOCUMENT_PATH} changed while the layer was collected"
        ))),
        None => Err(PackageError::format(format!(
            "{ADP_DOCUMENT_PATH} would be left out of the layer"
        ))),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(PackageError::io(path))
}

/// Build with default options.
pub fn build_package(source_dir: &Path, out_dir: &Path) -> Result<BuiltPackage> {
    PackageBuilder::new().build(source_dir, out_dir)
}
