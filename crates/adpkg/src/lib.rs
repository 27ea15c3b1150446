//! ADP packaging.
//!
//! Turns a validated agent source tree into a distributable artifact and
//! back:
//!
//! - [`oci`]: OCI image layout with content-addressed blobs
//! - [`flat`]: single zip file
//!
//! Both builders validate `adp/agent.yaml` with [`adp_schema`] before
//! writing anything.

pub mod cas;
pub mod error;
pub mod flat;
pub mod layer;
pub mod obs;
pub mod oci;
pub mod source;
pub mod telemetry;

pub use cas::fs::FsBlobStore;
pub use cas::{BlobRef, BlobStore, CasError, Digest};
pub use error::{PackageError, Result};
pub use flat::{
    build_flat_archive, build_flat_archive_with, open_flat_archive, unpack_flat_archive,
    FlatArchive, FlatArchiveOptions, FlatCompression,
};
pub use oci::builder::{build_package, BuildOptions, BuiltPackage, PackageBuilder};
pub use oci::reader::{
    open_package, read_package_document, PackageReader, ReaderOptions, UnpackedPackage,
};
pub use oci::PackageConfig;
