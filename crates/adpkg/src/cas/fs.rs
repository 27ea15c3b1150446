use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{BlobRef, BlobStore, CasError, Digest, Result, ALGORITHM};
use crate::obs;

/// Filesystem-backed blob store using the OCI image-layout blob convention.
///
/// Layout: `<root>/blobs/sha256/<hex>`
///
/// Writes go to a temporary file in the target directory and are renamed into
/// place, so a reader never observes a partially written blob.
pub struct FsBlobStore {
    root: PathBuf,
    blobs_dir: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. Nothing is touched on disk until the
    /// first `put`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let blobs_dir = root.join("blobs").join(ALGORITHM);
        Self { root, blobs_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir.join(digest.to_hex())
    }

    /// Every stored digest, sorted. Temporary files are ignored.
    pub fn list(&self) -> Result<Vec<Digest>> {
        let entries = match fs::read_dir(&self.blobs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CasError::Io {
                    path: self.blobs_dir.clone(),
                    source,
                })
            }
        };

        let mut digests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CasError::Io {
                path: self.blobs_dir.clone(),
                source,
            })?;
            if let Some(digest) = entry
                .file_name()
                .to_str()
                .and_then(|name| Digest::from_hex(name).ok())
            {
                digests.push(digest);
            }
        }
        digests.sort();
        Ok(digests)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> Result<BlobRef> {
        let blob = BlobRef::of(data);
        let path = self.blob_path(&blob.digest);

        if path.exists() {
            obs::emit_blob_stored(&blob.digest, blob.size, true);
            return Ok(blob);
        }

        let io_err = |source| CasError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.blobs_dir).map_err(|source| CasError::Io {
            path: self.blobs_dir.clone(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(&self.blobs_dir).map_err(io_err)?;
        tmp.write_all(data).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        obs::emit_blob_stored(&blob.digest, blob.size, false);
        Ok(blob)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::NotFound(*digest)
            } else {
                CasError::Io { path, source: e }
            }
        })
    }

    fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(self.blob_path(digest).is_file())
    }
}
