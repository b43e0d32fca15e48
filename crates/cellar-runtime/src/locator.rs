//! Discovery and ranking of installed compatibility runtimes.

use crate::RuntimeError;
use cellar_schema::{fingerprint_launcher, RuntimeFingerprint};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File at a runtime root that launches binaries through it.
pub const LAUNCHER_NAME: &str = "proton";
/// Colon-separated extra runtime locations.
pub const RUNTIME_PATHS_ENV: &str = "CELLAR_RUNTIME_PATHS";

const SYSTEM_DIRS: &[&str] = &["/usr/share/steam/compatibilitytools.d"];
const VENDOR_SUBDIRS: &[&str] = &[
    ".steam/root/compatibilitytools.d",
    ".steam/steam/compatibilitytools.d",
    ".local/share/Steam/compatibilitytools.d",
    ".steam/steam/steamapps/common",
    ".local/share/Steam/steamapps/common",
];
const FLATPAK_SUBDIRS: &[&str] = &[
    ".var/app/com.valvesoftware.Steam/data/Steam/compatibilitytools.d",
    ".var/app/com.valvesoftware.Steam/data/Steam/steamapps/common",
];
const COMMUNITY_MARKERS: &[&str] = &["ge-proton", "-ge", "tkg", "cachyos", "community"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Vendor,
    VendorFlatpak,
    System,
    Managed,
    Custom,
    EnvVar,
    Configured,
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoverySource::Vendor => write!(f, "vendor"),
            DiscoverySource::VendorFlatpak => write!(f, "vendor-flatpak"),
            DiscoverySource::System => write!(f, "system"),
            DiscoverySource::Managed => write!(f, "managed"),
            DiscoverySource::Custom => write!(f, "custom"),
            DiscoverySource::EnvVar => write!(f, "env"),
            DiscoverySource::Configured => write!(f, "configured"),
        }
    }
}

/// An installed runtime distribution.
///
/// Identity is the resolved launcher path; `fingerprint` is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Runtime {
    pub name: String,
    pub root_path: PathBuf,
    pub launcher_path: PathBuf,
    pub resolved_launcher: PathBuf,
    pub fingerprint: RuntimeFingerprint,
    pub source: DiscoverySource,
}

impl Runtime {
    /// Build a runtime from a directory that contains a launcher.
    pub fn from_root(root: &Path, source: DiscoverySource) -> Option<Self> {
        let launcher_path = root.join(LAUNCHER_NAME);
        if !launcher_path.is_file() {
            return None;
        }
        let resolved_launcher = fs::canonicalize(&launcher_path).unwrap_or_else(|_| launcher_path.clone());
        let name = root
            .file_name()
            .map_or_else(|| root.display().to_string(), |n| n.to_string_lossy().into_owned());
        Some(Self {
            name,
            root_path: root.to_path_buf(),
            fingerprint: fingerprint_launcher(&resolved_launcher),
            launcher_path,
            resolved_launcher,
            source,
        })
    }

    /// Build a runtime from a user-supplied root directory or launcher path.
    pub fn from_path(path: &Path) -> Result<Self, RuntimeError> {
        let root = if path.is_file() {
            path.parent().unwrap_or(path)
        } else {
            path
        };
        Self::from_root(root, DiscoverySource::Configured)
            .ok_or_else(|| RuntimeError::LauncherNotFound(path.display().to_string()))
    }

    /// The runtime's bundled `wine` binary.
    pub fn wine_binary(&self) -> Option<PathBuf> {
        self.bundled_binary("wine")
    }

    pub fn wineserver_binary(&self) -> Option<PathBuf> {
        self.bundled_binary("wineserver")
    }

    fn bundled_binary(&self, name: &str) -> Option<PathBuf> {
        ["files/bin", "dist/bin"]
            .iter()
            .map(|dir| self.root_path.join(dir).join(name))
            .find(|p| p.is_file())
    }
}

/// The ordered list of places to look for runtimes.
#[derive(Debug, Clone, Default)]
pub struct SearchRoots {
    pub home: Option<PathBuf>,
    pub system_dirs: Vec<PathBuf>,
    /// Launcher-managed download directory.
    pub managed_dir: Option<PathBuf>,
    pub custom_root: Option<PathBuf>,
    pub env_paths: Vec<PathBuf>,
}

impl SearchRoots {
    /// Search roots for this host: `$HOME`, system dirs, and `CELLAR_RUNTIME_PATHS`.
    pub fn from_env(managed_dir: Option<PathBuf>, custom_root: Option<PathBuf>) -> Self {
        Self {
            home: std::env::var_os("HOME").map(PathBuf::from),
            system_dirs: SYSTEM_DIRS.iter().map(PathBuf::from).collect(),
            managed_dir,
            custom_root,
            env_paths: std::env::var(RUNTIME_PATHS_ENV)
                .map(|v| parse_path_list(&v))
                .unwrap_or_default(),
        }
    }

    pub fn candidates(&self) -> Vec<(PathBuf, DiscoverySource)> {
        let mut out = Vec::new();
        if let Some(home) = &self.home {
            out.extend(
                VENDOR_SUBDIRS
                    .iter()
                    .map(|d| (home.join(d), DiscoverySource::Vendor)),
            );
            out.extend(
                FLATPAK_SUBDIRS
                    .iter()
                    .map(|d| (home.join(d), DiscoverySource::VendorFlatpak)),
            );
        }
        out.extend(
            self.system_dirs
                .iter()
                .map(|d| (d.clone(), DiscoverySource::System)),
        );
        if let Some(dir) = &self.managed_dir {
            out.push((dir.clone(), DiscoverySource::Managed));
        }
        if let Some(dir) = &self.custom_root {
            out.push((dir.clone(), DiscoverySource::Custom));
        }
        out.extend(
            self.env_paths
                .iter()
                .map(|d| (d.clone(), DiscoverySource::EnvVar)),
        );
        out
    }
}

pub fn parse_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Scan every candidate directory for runtimes.
///
/// A candidate that is itself a runtime root counts; otherwise its immediate
/// children are checked. Duplicates collapse by resolved launcher, then by
/// name, keeping the first occurrence.
pub fn discover_runtimes(roots: &SearchRoots) -> Vec<Runtime> {
    let mut found = Vec::new();
    for (dir, source) in roots.candidates() {
        if let Some(rt) = Runtime::from_root(&dir, source) {
            found.push(rt);
            continue;
        }
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        children.sort();
        for child in children {
            if let Some(rt) = Runtime::from_root(&child, source) {
                found.push(rt);
            }
        }
    }

    let mut seen_launchers = HashSet::new();
    let mut seen_names = HashSet::new();
    found.retain(|rt| {
        seen_launchers.insert(rt.resolved_launcher.clone()) && seen_names.insert(rt.name.clone())
    });
    debug!("discovered {} runtimes", found.len());
    found
}

fn rank_tier(name: &str) -> u8 {
    let lower = name.to_lowercase();
    if lower.contains("experimental") || lower.contains("bleeding") {
        0
    } else if has_token(&lower, "stable") || is_official_release(&lower) {
        1
    } else if COMMUNITY_MARKERS.iter().any(|m| lower.contains(m)) {
        2
    } else {
        3
    }
}

fn has_token(lower: &str, word: &str) -> bool {
    lower.split(|c: char| !c.is_ascii_alphanumeric()).any(|t| t == word)
}

fn is_official_release(lower: &str) -> bool {
    lower
        .strip_prefix("proton ")
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

fn version_key(name: &str) -> Vec<u64> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Pick the preferred runtime: bleeding-edge, then stable, then community
/// builds, then anything else; newer versions first within a tier.
pub fn find_best_runtime(runtimes: &[Runtime]) -> Option<&Runtime> {
    runtimes
        .iter()
        .enumerate()
        .min_by_key(|(idx, rt)| (rank_tier(&rt.name), Reverse(version_key(&rt.name)), *idx))
        .map(|(_, rt)| rt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_runtime(parent: &Path, name: &str) -> PathBuf {
        let root = parent.join(name);
        fs::create_dir_all(root.join("files/bin")).unwrap();
        fs::write(root.join(LAUNCHER_NAME), "#!/usr/bin/env python3\n").unwrap();
        fs::write(root.join("files/bin/wine"), "").unwrap();
        root
    }

    fn roots_with(custom: &Path) -> SearchRoots {
        SearchRoots {
            custom_root: Some(custom.to_path_buf()),
            ..SearchRoots::default()
        }
    }

    fn named(names: &[&str]) -> Vec<Runtime> {
        names
            .iter()
            .map(|n| Runtime {
                name: (*n).to_owned(),
                root_path: PathBuf::from(format!("/rt/{n}")),
                launcher_path: PathBuf::from(format!("/rt/{n}/proton")),
                resolved_launcher: PathBuf::from(format!("/rt/{n}/proton")),
                fingerprint: fingerprint_launcher(Path::new(&format!("/rt/{n}/proton"))),
                source: DiscoverySource::Custom,
            })
            .collect()
    }

    #[test]
    fn discovers_children_with_launcher() {
        let dir = tempfile::tempdir().unwrap();
        make_runtime(dir.path(), "GE-Proton9-20");
        make_runtime(dir.path(), "Proton - Experimental");
        fs::create_dir_all(dir.path().join("not-a-runtime")).unwrap();

        let found = discover_runtimes(&roots_with(dir.path()));
        let names: Vec<_> = found.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["GE-Proton9-20", "Proton - Experimental"]);
        assert!(found.iter().all(|r| r.source == DiscoverySource::Custom));
    }

    #[test]
    fn candidate_that_is_a_runtime_counts() {
        let dir = tempfile::tempdir().unwrap();
        let root = make_runtime(dir.path(), "Proton 9.0");
        let roots = SearchRoots {
            env_paths: vec![root.clone()],
            ..SearchRoots::default()
        };
        let found = discover_runtimes(&roots);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root_path, root);
        assert_eq!(found[0].source, DiscoverySource::EnvVar);
    }

    #[test]
    fn symlinked_runtime_collapses_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let real = make_runtime(dir.path(), "Proton 9.0");
        let other = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(&real, other.path().join("Proton-alias")).unwrap();

        let roots = SearchRoots {
            managed_dir: Some(dir.path().to_path_buf()),
            custom_root: Some(other.path().to_path_buf()),
            ..SearchRoots::default()
        };
        let found = discover_runtimes(&roots);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Proton 9.0");
        assert_eq!(found[0].source, DiscoverySource::Managed);
    }

    #[test]
    fn same_name_in_two_places_keeps_first() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        make_runtime(a.path(), "GE-Proton9-1");
        make_runtime(b.path(), "GE-Proton9-1");
        let roots = SearchRoots {
            managed_dir: Some(a.path().to_path_buf()),
            custom_root: Some(b.path().to_path_buf()),
            ..SearchRoots::default()
        };
        let found = discover_runtimes(&roots);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root_path, a.path().join("GE-Proton9-1"));
    }

    #[test]
    fn missing_directories_are_skipped() {
        let roots = roots_with(Path::new("/definitely/not/here"));
        assert!(discover_runtimes(&roots).is_empty());
    }

    #[test]
    fn experimental_beats_stable() {
        let rts = named(&["Compat-Stable", "Compat-Experimental"]);
        assert_eq!(find_best_runtime(&rts).unwrap().name, "Compat-Experimental");
    }

    #[test]
    fn stable_beats_community_beats_other() {
        let rts = named(&["wine-custom", "GE-Proton9-20", "Proton 8.0"]);
        assert_eq!(find_best_runtime(&rts).unwrap().name, "Proton 8.0");
        let rts = named(&["wine-custom", "GE-Proton9-20"]);
        assert_eq!(find_best_runtime(&rts).unwrap().name, "GE-Proton9-20");
    }

    #[test]
    fn unstable_is_not_stable() {
        let rts = named(&["Proton-unstable 10.0", "Proton 9.0 (stable)"]);
        assert_eq!(find_best_runtime(&rts).unwrap().name, "Proton 9.0 (stable)");
        assert_eq!(rank_tier("wine-unstable"), 3);
        assert_eq!(rank_tier("Compat-Stable"), 1);
    }

    #[test]
    fn newer_version_wins_within_tier() {
        let rts = named(&["GE-Proton8-32", "GE-Proton9-5", "GE-Proton9-20"]);
        assert_eq!(find_best_runtime(&rts).unwrap().name, "GE-Proton9-20");
    }

    #[test]
    fn empty_list_has_no_best() {
        assert!(find_best_runtime(&[]).is_none());
    }

    #[test]
    fn from_path_accepts_root_or_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let root = make_runtime(dir.path(), "Proton 9.0");
        let a = Runtime::from_path(&root).unwrap();
        let b = Runtime::from_path(&root.join(LAUNCHER_NAME)).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.source, DiscoverySource::Configured);
        assert!(Runtime::from_path(dir.path()).is_err());
    }

    #[test]
    fn bundled_wine_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = make_runtime(dir.path(), "Proton 9.0");
        let rt = Runtime::from_root(&root, DiscoverySource::Custom).unwrap();
        assert_eq!(rt.wine_binary().unwrap(), root.join("files/bin/wine"));
        assert!(rt.wineserver_binary().is_none());
    }

    #[test]
    fn path_list_parsing() {
        assert_eq!(
            parse_path_list("/a: /b ::"),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }
}
