//! Bookkeeping for bundled installer executables run inside an environment.

use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const PACKAGE_STATE_FILE: &str = ".cellar-packages.json";
/// `ERROR_SUCCESS_REBOOT_REQUIRED`: the installer succeeded but wants a reboot.
pub const REBOOT_REQUIRED_CODE: i32 = 3010;

const PACKAGE_STATE_VERSION: u32 = 1;

pub fn is_success_code(code: i32) -> bool {
    code == 0 || code == REBOOT_REQUIRED_CODE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRecord {
    /// Installer modification time in milliseconds since the epoch.
    pub content_signature: i64,
    pub last_exit_code: i32,
    pub at: String,
}

impl PackageRecord {
    pub fn new(content_signature: i64, last_exit_code: i32) -> Self {
        Self {
            content_signature,
            last_exit_code,
            at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageInstallState {
    #[serde(default)]
    pub schema_version: u32,
    /// Keyed by the installer's absolute path.
    #[serde(default)]
    pub installers: BTreeMap<String, PackageRecord>,
}

impl Default for PackageInstallState {
    fn default() -> Self {
        Self {
            schema_version: PACKAGE_STATE_VERSION,
            installers: BTreeMap::new(),
        }
    }
}

impl PackageInstallState {
    /// An installer can be skipped when it has not changed since a run that
    /// succeeded (or succeeded pending a reboot).
    pub fn should_skip(&self, installer: &Path, content_signature: i64) -> bool {
        self.installers
            .get(installer.to_string_lossy().as_ref())
            .is_some_and(|r| {
                r.content_signature == content_signature && is_success_code(r.last_exit_code)
            })
    }

    pub fn record(&mut self, installer: &Path, content_signature: i64, exit_code: i32) {
        self.installers.insert(
            installer.to_string_lossy().into_owned(),
            PackageRecord::new(content_signature, exit_code),
        );
    }
}

/// Installer content signature: modification time in milliseconds.
pub fn content_signature(installer: &Path) -> Result<i64, StoreError> {
    let modified = fs::metadata(installer)?.modified()?;
    Ok(chrono::DateTime::<chrono::Utc>::from(modified).timestamp_millis())
}

#[derive(Debug, Clone)]
pub struct PackageStateStore {
    path: PathBuf,
}

impl PackageStateStore {
    pub fn new(metadata_dir: &Path) -> Self {
        Self {
            path: metadata_dir.join(PACKAGE_STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable state is an empty state.
    pub fn read(&self) -> PackageInstallState {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return PackageInstallState::default(),
            Err(e) => {
                warn!("cannot read package state {}: {e}", self.path.display());
                return PackageInstallState::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("ignoring corrupted package state {}: {e}", self.path.display());
            PackageInstallState::default()
        })
    }

    pub fn write(&self, state: &PackageInstallState) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(state)?;
        write_atomic(&self.path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes() {
        assert!(is_success_code(0));
        assert!(is_success_code(REBOOT_REQUIRED_CODE));
        assert!(!is_success_code(1));
        assert!(!is_success_code(1638));
    }

    #[test]
    fn skip_requires_matching_signature_and_success() {
        let mut state = PackageInstallState::default();
        let exe = Path::new("/games/x/_CommonRedist/vcredist_x64.exe");
        assert!(!state.should_skip(exe, 100));

        state.record(exe, 100, REBOOT_REQUIRED_CODE);
        assert!(state.should_skip(exe, 100));
        assert!(!state.should_skip(exe, 101));

        state.record(exe, 100, 1603);
        assert!(!state.should_skip(exe, 100));
    }

    #[test]
    fn state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStateStore::new(dir.path());
        let mut state = store.read();
        assert!(state.installers.is_empty());

        state.record(Path::new("/a.exe"), 42, 0);
        store.write(&state).unwrap();

        let back = store.read();
        assert!(back.should_skip(Path::new("/a.exe"), 42));
        assert_eq!(back.installers["/a.exe"].last_exit_code, 0);
    }

    #[test]
    fn corrupted_state_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PackageStateStore::new(dir.path());
        fs::write(store.path(), "{{{{").unwrap();
        assert!(store.read().installers.is_empty());
    }

    #[test]
    fn signature_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("setup.exe");
        fs::write(&exe, "MZ").unwrap();
        let a = content_signature(&exe).unwrap();
        let b = content_signature(&exe).unwrap();
        assert_eq!(a, b);
        assert!(a > 0);
    }
}
