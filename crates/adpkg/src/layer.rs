//! Deterministic tar layers.
//!
//! A layer holds the regular files of a source tree under forward-slash
//! relative paths, sorted, with normalized headers (mtime 0, uid/gid 0,
//! mode 0644 or 0755). Identical trees produce byte-identical layers.
//! Directories are implied by file paths. Symlinks are followed and stored as
//! the files they resolve to; dangling links and special files are left out.
//! Entry names are unique within a layer.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PackageError, Result};

/// One regular file queued for a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEntry {
    /// Forward-slash path relative to the tree root.
    pub name: String,
    pub data: Vec<u8>,
    pub executable: bool,
}

/// Collect the regular files under `root`, skipping anything under one of
/// the `exclude` paths (relative to `root`). Entries come back sorted by name.
///
/// Linked files and directories are read through the link and named by
/// where the link sits in the tree. A link cycle is an error.
pub fn collect_entries(root: &Path, exclude: &[PathBuf]) -> Result<Vec<LayerEntry>> {
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || e
                    .path()
                    .strip_prefix(root)
                    .map(|rel| !exclude.iter().any(|ex| rel.starts_with(ex)))
                    .unwrap_or(true)
        });

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_dangling_link(&e) => continue,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                if e.loop_ancestor().is_some() {
                    return Err(PackageError::format(format!(
                        "symlink cycle at {}",
                        path.display()
                    )));
                }
                return Err(PackageError::Io {
                    path,
                    source: e.into(),
                });
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|_| PackageError::format(format!("{} escapes source tree", path.display())))?;
        let name = archive_name(rel)?;
        let data = std::fs::read(path).map_err(PackageError::io(path))?;
        let metadata = entry.metadata().map_err(|e| PackageError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        entries.push(LayerEntry {
            name,
            data,
            executable: is_executable(&metadata),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Archive the regular files under `root` into a deterministic tar.
pub fn archive_dir(root: &Path, exclude: &[PathBuf]) -> Result<Vec<u8>> {
    build_archive(&collect_entries(root, exclude)?)
}

/// Serialize `entries` as a tar, in the order given.
pub fn build_archive(entries: &[LayerEntry]) -> Result<Vec<u8>> {
    let tar_err = |e: std::io::Error| PackageError::format(format!("failed to write layer: {e}"));

    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);
    let mut seen = HashSet::new();
    for entry in entries {
        validate_archive_path(Path::new(&entry.name))?;
        check_unique(&mut seen, &entry.name)?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(entry.data.len() as u64);
        header.set_mode(if entry.executable { 0o755 } else { 0o644 });
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder
            .append_data(&mut header, &entry.name, Cursor::new(&entry.data))
            .map_err(tar_err)?;
    }
    builder.into_inner().map_err(tar_err)
}

/// Extract `archive` into `dest`, creating it if needed.
///
/// Absolute paths, `..` components, repeated file names and entry types
/// other than regular files and directories are rejected as malformed.
pub fn extract_archive(archive: &[u8], dest: &Path) -> Result<()> {
    // Reject repeats before anything is written.
    list_entries(archive)?;
    std::fs::create_dir_all(dest).map_err(PackageError::io(dest))?;

    let mut tar = tar::Archive::new(Cursor::new(archive));
    let entries = tar.entries().map_err(malformed)?;
    for entry in entries {
        let mut entry = entry.map_err(malformed)?;
        let rel = entry.path().map_err(malformed)?.into_owned();
        validate_archive_path(&rel)?;
        let out_path = dest.join(&rel);

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(PackageError::io(&out_path))?;
            continue;
        }
        if !entry_type.is_file() {
            return Err(PackageError::format(format!(
                "unsupported layer entry type for {}",
                rel.display()
            )));
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(PackageError::io(parent))?;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(malformed)?;
        std::fs::write(&out_path, &buf).map_err(PackageError::io(&out_path))?;
        #[cfg(unix)]
        if let Ok(mode) = entry.header().mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o777))
                .map_err(PackageError::io(&out_path))?;
        }
    }
    Ok(())
}

/// Read a single file from `archive` without extracting anything.
///
/// The whole archive is scanned, so a name stored twice is reported as
/// malformed rather than resolved to either copy.
pub fn read_entry(archive: &[u8], name: &str) -> Result<Option<Vec<u8>>> {
    let mut tar = tar::Archive::new(Cursor::new(archive));
    let mut seen = HashSet::new();
    let mut found = None;
    for entry in tar.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_name = archive_name(&entry.path().map_err(malformed)?)?;
        check_unique(&mut seen, &entry_name)?;
        if entry_name == name {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(malformed)?;
            found = Some(buf);
        }
    }
    Ok(found)
}

/// File names stored in `archive`, in archive order.
pub fn list_entries(archive: &[u8]) -> Result<Vec<String>> {
    let mut tar = tar::Archive::new(Cursor::new(archive));
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for entry in tar.entries().map_err(malformed)? {
        let entry = entry.map_err(malformed)?;
        if entry.header().entry_type().is_file() {
            let name = archive_name(&entry.path().map_err(malformed)?)?;
            check_unique(&mut seen, &name)?;
            names.push(name);
        }
    }
    Ok(names)
}

fn check_unique(seen: &mut HashSet<String>, name: &str) -> Result<()> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(PackageError::format(format!("duplicate layer entry {name}")))
    }
}

/// A link whose target does not exist.
fn is_dangling_link(err: &walkdir::Error) -> bool {
    let not_found = err
        .io_error()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound);
    not_found
        && err
            .path()
            .and_then(|p| std::fs::symlink_metadata(p).ok())
            .is_some_and(|m| m.file_type().is_symlink())
}

fn malformed(e: std::io::Error) -> PackageError {
    PackageError::format(format!("unreadable layer: {e}"))
}

/// Forward-slash archive name for a relative path.
fn archive_name(rel: &Path) -> Result<String> {
    validate_archive_path(rel)?;
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            let part = part.to_str().ok_or_else(|| {
                PackageError::format(format!("non UTF-8 path in layer: {}", rel.display()))
            })?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}

fn validate_archive_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(PackageError::format("empty layer entry path"));
    }
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(PackageError::format(format!(
                    "absolute layer entry path: {}",
                    path.display()
                )));
            }
            Component::ParentDir => {
                return Err(PackageError::format(format!(
                    "layer entry path escapes the package: {}",
                    path.display()
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}
