//! Structured tracing events for packaging operations.
//!
//! Every emitter attaches an `event` field so log pipelines can filter on a
//! stable name. Verbosity is controlled through `RUST_LOG`; see
//! [`crate::telemetry::init_tracing`].

use std::path::Path;

use tracing::{debug, info, warn};

use crate::cas::Digest;

/// RAII guard that tags all events emitted while it lives with the agent id.
///
/// ```ignore
/// let _span = PackageSpan::enter("agent.hello");
/// // events now carry agent_id = "agent.hello"
/// ```
pub struct PackageSpan {
    _span: tracing::span::EnteredSpan,
}

impl PackageSpan {
    pub fn enter(agent_id: &str) -> Self {
        let span = tracing::info_span!("adpkg.package", agent_id = %agent_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_build_started(agent_id: &str, source_dir: &Path) {
    info!(
        event = "package.build_started",
        agent_id = %agent_id,
        source_dir = %source_dir.display(),
    );
}

/// Emit event: OCI layout written with its manifest digest.
pub fn emit_build_finished(agent_id: &str, manifest: &Digest, layer_size: u64) {
    info!(
        event = "package.build_finished",
        agent_id = %agent_id,
        manifest = %manifest,
        layer_size = layer_size,
    );
}

/// Emit event: a document was rejected before anything was written (warning level).
pub fn emit_validation_failed(document: &Path, issues: usize) {
    warn!(
        event = "package.validation_failed",
        document = %document.display(),
        issues = issues,
    );
}

pub fn emit_blob_stored(digest: &Digest, size: u64, deduplicated: bool) {
    debug!(
        event = "blob.stored",
        digest = %digest,
        size = size,
        deduplicated = deduplicated,
    );
}

pub fn emit_package_opened(agent_id: &str, package: &Path, verified: bool) {
    info!(
        event = "package.opened",
        agent_id = %agent_id,
        package = %package.display(),
        verified = verified,
    );
}

pub fn emit_flat_archive_built(agent_id: &str, archive: &Path, entries: usize) {
    info!(
        event = "flat.built",
        agent_id = %agent_id,
        archive = %archive.display(),
        entries = entries,
    );
}

pub fn emit_flat_archive_opened(agent_id: &str, archive: &Path) {
    info!(event = "flat.opened", agent_id = %agent_id, archive = %archive.display());
}
