//! Reads ADP packages back from an OCI image layout.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use adp_schema::{AdpDocument, ADP_DOCUMENT_PATH};
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use super::{
    Descriptor, ImageLayout, Index, Manifest, PackageConfig, CONFIG_MEDIA_TYPE,
    IMAGE_LAYOUT_VERSION, INDEX_FILE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, OCI_LAYOUT_FILE,
};
use crate::cas::fs::FsBlobStore;
use crate::cas::{BlobStore, Digest};
use crate::error::{PackageError, Result};
use crate::{layer, obs};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Re-hash every blob read and compare it with its descriptor.
    pub verify_digests: bool,
}

/// A package extracted to a temporary directory.
///
/// The directory is removed when this value is dropped; use
/// [`UnpackedPackage::into_parts`] to keep it.
#[derive(Debug)]
pub struct UnpackedPackage {
    document: AdpDocument,
    dir: TempDir,
}

impl UnpackedPackage {
    pub fn document(&self) -> &AdpDocument {
        &self.document
    }

    /// Root of the extracted source tree.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn into_document(self) -> AdpDocument {
        self.document
    }

    pub fn into_parts(self) -> (AdpDocument, TempDir) {
        (self.document, self.dir)
    }
}

pub struct PackageReader {
    root: PathBuf,
    store: FsBlobStore,
    options: ReaderOptions,
}

impl PackageReader {
    pub fn new(pkg_dir: impl AsRef<Path>) -> Self {
        Self::with_options(pkg_dir, ReaderOptions::default())
    }

    pub fn with_options(pkg_dir: impl AsRef<Path>, options: ReaderOptions) -> Self {
        let root = pkg_dir.as_ref().to_path_buf();
        let store = FsBlobStore::new(&root);
        Self {
            root,
            store,
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> Result<ImageLayout> {
        let layout: ImageLayout = self.read_json_file(OCI_LAYOUT_FILE)?;
        if layout.image_layout_version != IMAGE_LAYOUT_VERSION {
            return Err(PackageError::format(format!(
                "unsupported imageLayoutVersion {:?}",
                layout.image_layout_version
            )));
        }
        Ok(layout)
    }

    pub fn index(&self) -> Result<Index> {
        self.read_json_file(INDEX_FILE)
    }

    /// The index's single manifest, with its descriptor.
    pub fn manifest(&self) -> Result<(Descriptor, Manifest)> {
        let index = self.index()?;
        let descriptor = match index.manifests.as_slice() {
            [only] => only.clone(),
            [] => return Err(PackageError::format("index.json lists no manifests")),
            many => {
                return Err(PackageError::format(format!(
                    "index.json lists {} manifests, expected exactly one",
                    many.len()
                )))
            }
        };
        expect_media_type(&descriptor, MANIFEST_MEDIA_TYPE)?;
        let manifest: Manifest = self.read_json_blob(&descriptor)?;
        Ok((descriptor, manifest))
    }

    pub fn config(&self) -> Result<PackageConfig> {
        let (_, manifest) = self.manifest()?;
        expect_media_type(&manifest.config, CONFIG_MEDIA_TYPE)?;
        self.read_json_blob(&manifest.config)
    }

    /// Raw bytes of the manifest's single layer.
    pub fn layer_bytes(&self) -> Result<Vec<u8>> {
        let (_, manifest) = self.manifest()?;
        let layer = single_layer(&manifest)?;
        self.read_blob(layer)
    }

    /// Parse the ADP document directly from the layer.
    pub fn read_document(&self) -> Result<AdpDocument> {
        self.layout()?;
        let layer = self.layer_bytes()?;
        let text = layer::read_entry(&layer, ADP_DOCUMENT_PATH)?.ok_or_else(missing_document)?;
        parse_document(&text)
    }

    /// Extract the layer into a fresh temporary directory inside the package
    /// directory and parse the ADP document from it.
    pub fn open(&self) -> Result<UnpackedPackage> {
        self.layout()?;
        let layer = self.layer_bytes()?;

        let dir = tempfile::Builder::new()
            .prefix(".adp-unpack-")
            .tempdir_in(&self.root)
            .map_err(PackageError::io(&self.root))?;
        layer::extract_archive(&layer, dir.path())?;

        let doc_path = dir.path().join(ADP_DOCUMENT_PATH);
        let text = match std::fs::read(&doc_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(missing_document()),
            Err(e) => return Err(PackageError::io(&doc_path)(e)),
        };
        let document = parse_document(&text)?;
        obs::emit_package_opened(&document.id, &self.root, self.options.verify_digests);
        Ok(UnpackedPackage { document, dir })
    }

    /// Check every blob reachable from the index against its descriptor.
    pub fn verify(&self) -> Result<()> {
        self.layout()?;
        let (descriptor, manifest) = self.manifest()?;
        for d in std::iter::once(&descriptor)
            .chain(std::iter::once(&manifest.config))
            .chain(manifest.layers.iter())
        {
            let data = self.store.get_verified(&d.digest)?;
            check_size(d, &data)?;
        }
        Ok(())
    }

    /// Every digest present under `blobs/sha256`, sorted.
    pub fn list_blobs(&self) -> Result<Vec<Digest>> {
        Ok(self.store.list()?)
    }

    fn read_blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        if self.options.verify_digests {
            let data = self.store.get_verified(&descriptor.digest)?;
            check_size(descriptor, &data)?;
            Ok(data)
        } else {
            Ok(self.store.get(&descriptor.digest)?)
        }
    }

    fn read_json_blob<T: DeserializeOwned>(&self, descriptor: &Descriptor) -> Result<T> {
        let data = self.read_blob(descriptor)?;
        serde_json::from_slice(&data).map_err(|e| {
            PackageError::format(format!("blob {} is not valid JSON: {e}", descriptor.digest))
        })
    }

    fn read_json_file<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.root.join(name);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PackageError::format(format!(
                    "missing {name} in {}",
                    self.root.display()
                )))
            }
            Err(e) => return Err(PackageError::io(&path)(e)),
        };
        serde_json::from_slice(&data)
            .map_err(|e| PackageError::format(format!("{name} is not valid: {e}")))
    }
}

fn expect_media_type(descriptor: &Descriptor, expected: &str) -> Result<()> {
    if descriptor.media_type != expected {
        return Err(PackageError::format(format!(
            "descriptor {} has media type {:?}, expected {expected:?}",
            descriptor.digest, descriptor.media_type
        )));
    }
    Ok(())
}

fn single_layer(manifest: &Manifest) -> Result<&Descriptor> {
    match manifest.layers.as_slice() {
        [only] => {
            expect_media_type(only, LAYER_MEDIA_TYPE)?;
            Ok(only)
        }
        layers => Err(PackageError::format(format!(
            "manifest lists {} layers, expected exactly one",
            layers.len()
        ))),
    }
}

fn check_size(descriptor: &Descriptor, data: &[u8]) -> Result<()> {
    if data.len() as u64 != descriptor.size {
        return Err(PackageError::format(format!(
            "blob {} is {} bytes, descriptor says {}",
            descriptor.digest,
            data.len(),
            descriptor.size
        )));
    }
    Ok(())
}

fn missing_document() -> PackageError {
    PackageError::MissingDocument {
        path: ADP_DOCUMENT_PATH.to_string(),
    }
}

fn parse_document(text: &[u8]) -> Result<AdpDocument> {
    let text = std::str::from_utf8(text)
        .map_err(|e| PackageError::format(format!("{ADP_DOCUMENT_PATH} is not UTF-8: {e}")))?;
    AdpDocument::from_yaml_str(text)
        .map_err(|e| PackageError::format(format!("{ADP_DOCUMENT_PATH} is malformed: {e}")))
}

/// Open `pkg_dir` with default options.
pub fn open_package(pkg_dir: &Path) -> Result<UnpackedPackage> {
    PackageReader::new(pkg_dir).open()
}

/// Read the ADP document of `pkg_dir` without extracting the layer.
pub fn read_package_document(pkg_dir: &Path) -> Result<AdpDocument> {
    PackageReader::new(pkg_dir).read_document()
}
