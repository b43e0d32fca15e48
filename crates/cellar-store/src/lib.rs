//! Environment layout, legacy migration, and per-prefix state records for Cellar.
//!
//! This crate provides the storage layer: `StoreLayout` for mapping
//! `(slug, fingerprint)` keys onto directories, `resolve_paths` for splitting an
//! environment into its metadata directory and compatibility home (migrating
//! legacy layouts on first touch), `MetadataStore` for the versioned
//! initialization record, `PackageStateStore` for bundled-installer bookkeeping,
//! and symlink-preserving tree helpers used for template cloning.

pub mod layout;
pub mod metadata;
pub mod packages;
pub mod tree;

pub use layout::{
    is_metadata_entry, resolve_paths, EnvPaths, StoreLayout, COMPAT_HOME_DIR, METADATA_PREFIX,
};
pub use metadata::{
    EnvironmentMetadata, MetadataStore, PrerequisiteStatus, CURRENT_SCHEMA_VERSION,
    MAX_PREREQUISITE_ATTEMPTS, METADATA_FILE,
};
pub use packages::{
    content_signature, is_success_code, PackageInstallState, PackageRecord, PackageStateStore,
    PACKAGE_STATE_FILE, REBOOT_REQUIRED_CODE,
};
pub use tree::{copy_tree, move_entry, remove_tree};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` through a temp file in the same directory.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] cellar_schema::SchemaError),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("layout migration failed for '{path}': {reason}")]
    Migration { path: String, reason: String },
}
