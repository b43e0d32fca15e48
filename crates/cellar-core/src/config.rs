use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "CELLAR_CONFIG";
/// Overrides the data directory from the config file.
pub const DATA_DIR_ENV: &str = "CELLAR_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellarConfig {
    /// Root for prefixes, managed runtimes, and logs.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Extra directory scanned for runtimes.
    #[serde(default)]
    pub custom_runtime_root: Option<PathBuf>,
    /// Root of the runtime picked last time; preferred while it is still installed.
    #[serde(default)]
    pub default_runtime: Option<PathBuf>,
    #[serde(default)]
    pub steam_root: Option<PathBuf>,
    #[serde(default)]
    pub install_core_fonts: bool,
}

impl CellarConfig {
    /// Load config from `$CELLAR_CONFIG` or `~/.config/cellar/config.json`.
    pub fn load_default() -> Result<(Self, PathBuf), CoreError> {
        let path = default_config_path()?;
        let config = Self::load_or_default(&path)?;
        Ok((config, path))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// A missing file is the default config.
    pub fn load_or_default(path: &Path) -> Result<Self, CoreError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CoreError::from(e.error))?;
        Ok(())
    }

    /// Data directory: `$CELLAR_DATA_DIR`, then the config value, then
    /// `$XDG_DATA_HOME/cellar`, then `~/.local/share/cellar`.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, CoreError> {
        resolve_data_dir_with(
            self,
            std::env::var_os(DATA_DIR_ENV).map(PathBuf::from),
            std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
            std::env::var_os("HOME").map(PathBuf::from),
        )
    }
}

fn resolve_data_dir_with(
    config: &CellarConfig,
    env_override: Option<PathBuf>,
    xdg_data_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf, CoreError> {
    if let Some(dir) = env_override.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(dir);
    }
    if let Some(dir) = &config.data_dir {
        return Ok(dir.clone());
    }
    if let Some(xdg) = xdg_data_home.filter(|p| p.is_absolute()) {
        return Ok(xdg.join("cellar"));
    }
    home.map(|h| h.join(".local/share/cellar"))
        .ok_or_else(|| CoreError::Config("HOME not set and no data directory configured".to_owned()))
}

fn default_config_path() -> Result<PathBuf, CoreError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var("HOME").map_err(|_| CoreError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/cellar/config.json"))
}
