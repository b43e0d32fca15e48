use crate::prereq::find_in_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variables removed from the host environment before it reaches a game.
const STRIPPED_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "APPDIR",
    "APPIMAGE",
    "ARGV0",
    "OWD",
    "PYTHONHOME",
    "PYTHONPATH",
    "GIO_MODULE_DIR",
    "GDK_PIXBUF_MODULE_FILE",
    "GSETTINGS_SCHEMA_DIR",
    "CHROME_DESKTOP",
];
const STRIPPED_PREFIXES: &[&str] = &["ELECTRON_", "NODE_", "npm_", "CARGO_", "RUSTUP_", "VSCODE_"];

const STEAM_ROOT_SUBDIRS: &[&str] = &[
    ".steam/root",
    ".steam/steam",
    ".local/share/Steam",
    ".var/app/com.valvesoftware.Steam/data/Steam",
];

pub const EAC_RUNTIME_DIR: &str = "Proton EasyAntiCheat Runtime";
pub const BATTLEYE_RUNTIME_DIR: &str = "Proton BattlEye Runtime";

/// Snapshot of everything the launch builder reads from the host.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    pub env: BTreeMap<String, String>,
    /// Detected Steam client installs, preferred first.
    pub steam_roots: Vec<PathBuf>,
    /// Cellar's data directory; stands in for the client path and log root.
    pub data_dir: PathBuf,
}

impl HostContext {
    /// Capture the current process environment and detect Steam installs.
    pub fn from_process(data_dir: &Path, configured_steam_root: Option<&Path>) -> Self {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        let home = env.get("HOME").map(PathBuf::from);
        Self {
            steam_roots: detect_steam_roots(home.as_deref(), configured_steam_root),
            env,
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn client_install_path(&self) -> PathBuf {
        self.steam_roots
            .first()
            .cloned()
            .unwrap_or_else(|| self.data_dir.clone())
    }

    pub fn default_log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Locate a tool on this context's `PATH`.
    pub fn find_tool(&self, name: &str) -> Option<PathBuf> {
        let path_var = self.env.get("PATH")?;
        find_in_path(name, Some(path_var))
    }

    /// An add-on runtime shipped under a Steam library, e.g. the anti-cheat bridges.
    pub fn addon_runtime(&self, dir_name: &str) -> Option<PathBuf> {
        self.steam_roots
            .iter()
            .map(|root| root.join("steamapps/common").join(dir_name))
            .find(|p| p.is_dir())
    }
}

fn detect_steam_roots(home: Option<&Path>, configured: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = configured.map(Path::to_path_buf).into_iter().collect();
    if let Some(home) = home {
        candidates.extend(STEAM_ROOT_SUBDIRS.iter().map(|d| home.join(d)));
    }

    let mut roots: Vec<PathBuf> = Vec::new();
    for candidate in candidates {
        if !candidate.is_dir() {
            continue;
        }
        let resolved = std::fs::canonicalize(&candidate).unwrap_or(candidate);
        if !roots.contains(&resolved) {
            roots.push(resolved);
        }
    }
    roots
}

fn is_stripped(name: &str) -> bool {
    STRIPPED_VARS.contains(&name) || STRIPPED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Drop variables that leak the launcher's own packaging into a game process.
pub fn sanitize_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .filter(|(k, _)| !is_stripped(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merge two `WINEDLLOVERRIDES` values. Entries are keyed by the DLL part
/// (case-insensitive); an entry from `overrides` replaces a host entry in place.
pub fn merge_dll_overrides(host: Option<&str>, overrides: Option<&str>) -> Option<String> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for entry in [host, overrides]
        .into_iter()
        .flatten()
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|e| !e.is_empty())
    {
        let key = entry.split('=').next().unwrap_or(entry).trim().to_lowercase();
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = entry.to_owned(),
            None => merged.push((key, entry.to_owned())),
        }
    }
    if merged.is_empty() {
        return None;
    }
    Some(
        merged
            .into_iter()
            .map(|(_, e)| e)
            .collect::<Vec<_>>()
            .join(";"),
    )
}
