use crate::tree::{move_entry, remove_tree};
use crate::StoreError;
use cellar_schema::{env_dir_name, RuntimeFingerprint, Slug};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Subdirectory holding the compatibility-layer home in the modern layout.
pub const COMPAT_HOME_DIR: &str = "pfx";
/// Files owned by Cellar at an environment root start with this prefix.
pub const METADATA_PREFIX: &str = ".cellar";

const STAGING_DIR: &str = ".cellar-pfx-staging";
const LEGACY_MARKERS: &[&str] = &["drive_c", "system.reg", "user.reg", "userdef.reg", "dosdevices"];

/// Directory layout of the Cellar data directory.
///
/// ```text
/// <data_dir>/prefixes/<slug>-<fingerprint>/   one environment
/// <data_dir>/runtimes/                        launcher-managed runtime downloads
/// <data_dir>/logs/                            runtime logs
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn prefixes_dir(&self) -> PathBuf {
        self.root.join("prefixes")
    }

    #[inline]
    pub fn runtimes_dir(&self) -> PathBuf {
        self.root.join("runtimes")
    }

    #[inline]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[inline]
    pub fn env_path(&self, slug: &Slug, fingerprint: &RuntimeFingerprint) -> PathBuf {
        self.prefixes_dir().join(env_dir_name(slug, fingerprint))
    }

    #[inline]
    pub fn template_path(&self, fingerprint: &RuntimeFingerprint) -> PathBuf {
        self.env_path(&Slug::template(), fingerprint)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.prefixes_dir())?;
        fs::create_dir_all(self.runtimes_dir())?;
        Ok(())
    }
}

/// The two halves of an environment directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvPaths {
    /// Where Cellar's records live; exported as the compat-data path.
    pub metadata_dir: PathBuf,
    /// The compatibility-layer home (wine prefix).
    pub compat_home: PathBuf,
}

impl EnvPaths {
    /// An unmanaged prefix used in place: its wine home is the root itself.
    pub fn is_flat(&self) -> bool {
        self.compat_home == self.metadata_dir
    }
}

pub fn is_metadata_entry(name: &str) -> bool {
    name.starts_with(METADATA_PREFIX)
}

/// Split an environment root into its metadata directory and compat home.
///
/// With `allow_migrate`, a legacy layout (prefix files directly at the root) is
/// moved into `pfx/` and a missing environment gets `pfx/` created eagerly.
/// Without it the path is treated as an unmanaged prefix and never restructured.
/// Calling this repeatedly is a no-op once the modern layout is in place.
pub fn resolve_paths(env_root: &Path, allow_migrate: bool) -> Result<EnvPaths, StoreError> {
    if env_root.file_name().is_some_and(|n| n == COMPAT_HOME_DIR) {
        let metadata_dir = env_root
            .parent()
            .map_or_else(|| env_root.to_path_buf(), Path::to_path_buf);
        return Ok(EnvPaths {
            metadata_dir,
            compat_home: env_root.to_path_buf(),
        });
    }

    if env_root.exists() && !env_root.is_dir() {
        return Err(StoreError::NotADirectory(env_root.display().to_string()));
    }

    let modern = env_root.join(COMPAT_HOME_DIR);
    let modern_paths = EnvPaths {
        metadata_dir: env_root.to_path_buf(),
        compat_home: modern.clone(),
    };

    if modern.is_dir() {
        return Ok(modern_paths);
    }

    if !allow_migrate {
        return Ok(EnvPaths {
            metadata_dir: env_root.to_path_buf(),
            compat_home: env_root.to_path_buf(),
        });
    }

    if is_legacy_layout(env_root) {
        migrate_legacy_layout(env_root)?;
        return Ok(modern_paths);
    }

    fs::create_dir_all(&modern)?;
    debug!("created compat home {}", modern.display());
    Ok(modern_paths)
}

fn is_legacy_layout(env_root: &Path) -> bool {
    env_root.join(STAGING_DIR).is_dir()
        || LEGACY_MARKERS
            .iter()
            .any(|m| env_root.join(m).symlink_metadata().is_ok())
}

/// Move every non-metadata entry at `env_root` into `pfx/`.
///
/// Entries go through a staging directory that is renamed into place last, so
/// an interrupted migration never leaves a half-populated `pfx/` behind; the
/// next call picks the staging directory up and finishes the move.
fn migrate_legacy_layout(env_root: &Path) -> Result<(), StoreError> {
    info!("migrating legacy prefix layout at {}", env_root.display());
    let staging = env_root.join(STAGING_DIR);
    fs::create_dir_all(&staging)?;

    let mut moved = 0usize;
    for entry in fs::read_dir(env_root)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if is_metadata_entry(&name_str) || name_str == COMPAT_HOME_DIR {
            continue;
        }
        let dest = staging.join(&name);
        // A root entry is the original; a staged copy of the same name is a partial move.
        if dest.symlink_metadata().is_ok() {
            warn!(
                "staging already holds '{name_str}', replacing it with the root original at {}",
                env_root.display()
            );
            remove_tree(&dest).map_err(|e| StoreError::Migration {
                path: env_root.display().to_string(),
                reason: format!("clearing staged '{name_str}': {e}"),
            })?;
        }
        move_entry(&entry.path(), &dest).map_err(|e| StoreError::Migration {
            path: env_root.display().to_string(),
            reason: format!("moving '{name_str}': {e}"),
        })?;
        moved += 1;
    }

    fs::rename(&staging, env_root.join(COMPAT_HOME_DIR)).map_err(|e| StoreError::Migration {
        path: env_root.display().to_string(),
        reason: format!("finalizing {COMPAT_HOME_DIR}: {e}"),
    })?;
    info!("moved {moved} entries into {COMPAT_HOME_DIR}/");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn names(dir: &Path) -> Vec<String> {
        let mut v: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    fn create_legacy_env(root: &Path) {
        fs::create_dir_all(root.join("drive_c/users")).unwrap();
        fs::create_dir_all(root.join("dosdevices")).unwrap();
        symlink("/", root.join("dosdevices/z:")).unwrap();
        fs::write(root.join("system.reg"), "sys").unwrap();
        fs::write(root.join("user.reg"), "usr").unwrap();
        fs::write(root.join(".update-timestamp"), "1").unwrap();
        fs::write(root.join(".cellar-env.json"), "{}").unwrap();
        fs::write(root.join(".cellar-packages.json"), "{}").unwrap();
    }

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/cellar-test");
        let slug = Slug::parse("portal").unwrap();
        let fp = RuntimeFingerprint::from("0123456789ab");
        assert_eq!(
            layout.prefixes_dir(),
            PathBuf::from("/tmp/cellar-test/prefixes")
        );
        assert_eq!(
            layout.env_path(&slug, &fp),
            PathBuf::from("/tmp/cellar-test/prefixes/portal-0123456789ab")
        );
        assert_eq!(
            layout.template_path(&fp),
            PathBuf::from("/tmp/cellar-test/prefixes/default-0123456789ab")
        );
        assert_eq!(
            layout.runtimes_dir(),
            PathBuf::from("/tmp/cellar-test/runtimes")
        );
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.prefixes_dir().is_dir());
    }

    #[test]
    fn path_ending_in_pfx_is_compat_home() {
        let paths = resolve_paths(Path::new("/envs/game/pfx"), true).unwrap();
        assert_eq!(paths.compat_home, PathBuf::from("/envs/game/pfx"));
        assert_eq!(paths.metadata_dir, PathBuf::from("/envs/game"));
    }

    #[test]
    fn missing_env_gets_pfx_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("new-env");
        let paths = resolve_paths(&root, true).unwrap();
        assert!(paths.compat_home.is_dir());
        assert_eq!(paths.compat_home, root.join("pfx"));
        assert_eq!(paths.metadata_dir, root);
    }

    #[test]
    fn unmanaged_path_is_never_restructured() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("user-prefix");
        create_legacy_env(&root);
        let before = names(&root);

        let paths = resolve_paths(&root, false).unwrap();
        assert_eq!(paths.compat_home, root);
        assert_eq!(names(&root), before);
        assert!(!root.join("pfx").exists());
    }

    #[test]
    fn unmanaged_missing_path_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        let paths = resolve_paths(&root, false).unwrap();
        assert_eq!(paths.compat_home, root);
        assert!(!root.exists());
    }

    #[test]
    fn legacy_layout_migrates_all_non_metadata_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        create_legacy_env(&root);
        let expected: Vec<String> = names(&root)
            .into_iter()
            .filter(|n| !is_metadata_entry(n))
            .collect();

        let paths = resolve_paths(&root, true).unwrap();

        assert_eq!(paths.compat_home, root.join("pfx"));
        assert_eq!(names(&paths.compat_home), expected);
        assert_eq!(
            names(&root),
            vec![".cellar-env.json", ".cellar-packages.json", "pfx"]
        );
        let z = paths.compat_home.join("dosdevices/z:");
        assert!(z.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn resolve_is_idempotent_after_migration() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        create_legacy_env(&root);

        let first = resolve_paths(&root, true).unwrap();
        let snapshot = names(&first.compat_home);
        let second = resolve_paths(&root, true).unwrap();
        assert_eq!(first, second);
        assert_eq!(names(&second.compat_home), snapshot);
    }

    #[test]
    fn interrupted_migration_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        create_legacy_env(&root);
        // Simulate a crash after drive_c was staged.
        fs::create_dir_all(root.join(STAGING_DIR)).unwrap();
        fs::rename(root.join("drive_c"), root.join(STAGING_DIR).join("drive_c")).unwrap();

        let paths = resolve_paths(&root, true).unwrap();
        let moved = names(&paths.compat_home);
        assert!(moved.contains(&"drive_c".to_owned()));
        assert!(moved.contains(&"system.reg".to_owned()));
        assert!(!root.join(STAGING_DIR).exists());
    }

    #[test]
    fn partial_staged_copy_yields_to_root_original() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        create_legacy_env(&root);
        fs::write(root.join("drive_c/users/profile.dat"), "full").unwrap();
        // A crash mid-copy left an incomplete drive_c in staging.
        let staged = root.join(STAGING_DIR).join("drive_c");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("half.tmp"), "partial").unwrap();

        let paths = resolve_paths(&root, true).unwrap();

        let drive_c = paths.compat_home.join("drive_c");
        assert_eq!(
            fs::read_to_string(drive_c.join("users/profile.dat")).unwrap(),
            "full"
        );
        assert!(!drive_c.join("half.tmp").exists());
        assert_eq!(
            names(&root),
            vec![".cellar-env.json", ".cellar-packages.json", "pfx"]
        );
    }

    #[test]
    fn file_as_env_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            resolve_paths(&file, true),
            Err(StoreError::NotADirectory(_))
        ));
    }
}
