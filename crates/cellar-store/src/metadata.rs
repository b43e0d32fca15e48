use crate::{write_atomic, StoreError};
use cellar_schema::{RuntimeFingerprint, Slug};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current metadata schema version. Incremented whenever the meaning of the
/// initialization flags changes; older records re-run initialization.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;
/// Prerequisite installation is attempted at most this many times.
pub const MAX_PREREQUISITE_ATTEMPTS: u32 = 2;
pub const METADATA_FILE: &str = ".cellar-env.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrerequisiteStatus {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<String>,
    /// Host tool used for the last attempt.
    #[serde(default)]
    pub tool: Option<String>,
    /// `None` until an attempt has completed.
    #[serde(default)]
    pub ok: Option<bool>,
}

impl PrerequisiteStatus {
    pub fn is_success(&self) -> bool {
        self.ok == Some(true)
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempts < MAX_PREREQUISITE_ATTEMPTS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentMetadata {
    /// Missing in pre-versioned records, which therefore read as stale.
    #[serde(default)]
    pub schema_version: u32,
    /// Slug that owns this directory.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default = "now_rfc3339")]
    pub initialized_at: String,
    #[serde(default = "now_rfc3339")]
    pub updated_at: String,
    #[serde(default)]
    pub bound_runtime: Option<RuntimeFingerprint>,
    #[serde(default)]
    pub base_init_done: bool,
    #[serde(default)]
    pub prerequisite: PrerequisiteStatus,
    /// Schema version this record was read with, when [`migrate`](Self::migrate) upgraded it.
    #[serde(skip)]
    pub migrated_from: Option<u32>,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl EnvironmentMetadata {
    pub fn new(slug: Option<&Slug>, runtime: &RuntimeFingerprint) -> Self {
        let now = now_rfc3339();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            slug: slug.map(ToString::to_string),
            initialized_at: now.clone(),
            updated_at: now,
            bound_runtime: Some(runtime.clone()),
            base_init_done: false,
            prerequisite: PrerequisiteStatus::default(),
            migrated_from: None,
        }
    }

    /// Bring a record up to [`CURRENT_SCHEMA_VERSION`].
    ///
    /// A version mismatch invalidates `base_init_done` and `prerequisite`;
    /// every other field is kept. Returns `true` if anything changed.
    pub fn migrate(&mut self) -> bool {
        if self.schema_version == CURRENT_SCHEMA_VERSION {
            return false;
        }
        debug!(
            "metadata schema v{} != v{CURRENT_SCHEMA_VERSION}, resetting init state",
            self.schema_version
        );
        self.migrated_from = Some(self.schema_version);
        self.schema_version = CURRENT_SCHEMA_VERSION;
        self.base_init_done = false;
        self.prerequisite = PrerequisiteStatus::default();
        true
    }

    pub fn was_migrated(&self) -> bool {
        self.migrated_from.is_some()
    }

    pub fn is_bound_to(&self, runtime: &RuntimeFingerprint) -> bool {
        self.bound_runtime.as_ref() == Some(runtime)
    }

    /// Everything done for `runtime`; provisioning can return immediately.
    pub fn is_ready_for(&self, runtime: &RuntimeFingerprint) -> bool {
        self.schema_version == CURRENT_SCHEMA_VERSION
            && self.is_bound_to(runtime)
            && self.base_init_done
            && self.prerequisite.is_success()
    }

    pub fn reset_prerequisite(&mut self) {
        self.prerequisite = PrerequisiteStatus::default();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}

/// Reads and writes the metadata record at an environment root.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(metadata_dir: &Path) -> Self {
        Self {
            path: metadata_dir.join(METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the record, migrated to the current schema.
    ///
    /// A missing file is `Ok(None)`. An unparseable file is also `Ok(None)`,
    /// logged, since the only cost of losing it is re-running initialization.
    pub fn read(&self) -> Result<Option<EnvironmentMetadata>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<EnvironmentMetadata>(&content) {
            Ok(mut meta) => {
                meta.migrate();
                Ok(Some(meta))
            }
            Err(e) => {
                warn!("ignoring corrupted metadata {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }

    pub fn write(&self, meta: &EnvironmentMetadata) -> Result<(), StoreError> {
        let mut stamped = meta.clone();
        stamped.schema_version = CURRENT_SCHEMA_VERSION;
        stamped.touch();
        let content = serde_json::to_string_pretty(&stamped)?;
        write_atomic(&self.path, content.as_bytes())
    }

    /// Reset only the prerequisite portion of an existing record.
    pub fn reset_prerequisite(&self) -> Result<bool, StoreError> {
        let Some(mut meta) = self.read()? else {
            return Ok(false);
        };
        meta.reset_prerequisite();
        self.write(&meta)?;
        Ok(true)
    }

    pub fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
