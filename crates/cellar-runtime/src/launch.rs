//! Turning an executable and an environment into a spawnable command line.
//!
//! Nothing here spawns a process or touches the filesystem beyond existence
//! checks; host state comes in through [`HostContext`].

use crate::host::{merge_dll_overrides, sanitize_env, HostContext, BATTLEYE_RUNTIME_DIR, EAC_RUNTIME_DIR};
use crate::locator::Runtime;
use crate::prereq::GAMEMODE_TOOL;
use crate::process::CommandSpec;
use crate::RuntimeError;
use cellar_schema::{LaunchOptions, DEFAULT_APP_ID};
use cellar_store::EnvPaths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const RUN_VERB: &str = "run";
const LAUNCH_VERB: &str = "waitforexitandrun";

/// Everything a caller needs to spawn the game. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchSpec {
    pub runner_path: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// The complete environment for the child; not layered over anything.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub exe: PathBuf,
    pub args: Vec<String>,
    pub runtime: Option<Runtime>,
    /// Resolved environment; ignored without a runtime.
    pub env_paths: Option<EnvPaths>,
    pub options: LaunchOptions,
}

/// Variables that point a runtime at an environment.
///
/// Used as an overlay for boot and installer processes. Includes `WINE` and
/// `WINESERVER` when the runtime bundles them, for tools that drive wine
/// directly.
pub fn compat_env(runtime: &Runtime, paths: &EnvPaths, host: &HostContext) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        "STEAM_COMPAT_DATA_PATH".to_owned(),
        path_str(&paths.metadata_dir),
    );
    env.insert("WINEPREFIX".to_owned(), path_str(&paths.compat_home));
    env.insert(
        "STEAM_COMPAT_CLIENT_INSTALL_PATH".to_owned(),
        path_str(&host.client_install_path()),
    );
    if let Some(wine) = runtime.wine_binary() {
        env.insert("WINE".to_owned(), path_str(&wine));
    }
    if let Some(wineserver) = runtime.wineserver_binary() {
        env.insert("WINESERVER".to_owned(), path_str(&wineserver));
    }
    env
}

/// `proton run <args..>` for helper processes inside an environment.
pub fn runtime_run_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    std::iter::once(RUN_VERB.to_owned())
        .chain(args.into_iter().map(Into::into))
        .collect()
}

/// Command running `args` inside an environment.
///
/// The launcher derives the prefix from `STEAM_COMPAT_DATA_PATH` and creates
/// `pfx/` under it, so a flat prefix is driven with the bundled wine binary.
pub fn runtime_command<I, S>(runtime: &Runtime, paths: &EnvPaths, args: I) -> Result<CommandSpec, RuntimeError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    if paths.is_flat() {
        let wine = flat_prefix_wine(runtime, paths)?;
        return Ok(CommandSpec::new(wine).args(args));
    }
    Ok(CommandSpec::new(&runtime.launcher_path).args(runtime_run_args(args)))
}

fn flat_prefix_wine(runtime: &Runtime, paths: &EnvPaths) -> Result<PathBuf, RuntimeError> {
    runtime
        .wine_binary()
        .ok_or_else(|| RuntimeError::FlatPrefixUnsupported {
            prefix: path_str(&paths.compat_home),
            runtime: runtime.name.clone(),
        })
}

pub fn build_launch_spec(request: &LaunchRequest, host: &HostContext) -> Result<LaunchSpec, RuntimeError> {
    let working_dir = request
        .exe
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let options = &request.options;

    let mut env = sanitize_env(&host.env);

    let (mut runner_path, mut args) = match (&request.runtime, &request.env_paths) {
        (Some(runtime), Some(paths)) => {
            env.insert(
                "STEAM_COMPAT_DATA_PATH".to_owned(),
                path_str(&paths.metadata_dir),
            );
            env.insert("WINEPREFIX".to_owned(), path_str(&paths.compat_home));
            env.insert(
                "STEAM_COMPAT_CLIENT_INSTALL_PATH".to_owned(),
                path_str(&host.client_install_path()),
            );
            env.insert("STEAM_COMPAT_INSTALL_PATH".to_owned(), path_str(&working_dir));
            let app_id = options.app_id.as_deref().unwrap_or(DEFAULT_APP_ID);
            env.insert("SteamAppId".to_owned(), app_id.to_owned());
            env.insert("SteamGameId".to_owned(), app_id.to_owned());

            if options.enable_logging {
                let log_dir = options.log_dir.clone().unwrap_or_else(|| host.default_log_dir());
                env.insert("PROTON_LOG".to_owned(), "1".to_owned());
                env.insert("PROTON_LOG_DIR".to_owned(), path_str(&log_dir));
            }
            if let Some(eac) = host.addon_runtime(EAC_RUNTIME_DIR) {
                env.insert("PROTON_EAC_RUNTIME".to_owned(), path_str(&eac));
            }
            if let Some(battleye) = host.addon_runtime(BATTLEYE_RUNTIME_DIR) {
                env.insert("PROTON_BATTLEYE_RUNTIME".to_owned(), path_str(&battleye));
            }

            if paths.is_flat() {
                let mut args = vec![path_str(&request.exe)];
                args.extend(request.args.iter().cloned());
                (flat_prefix_wine(runtime, paths)?, args)
            } else {
                let mut args = vec![LAUNCH_VERB.to_owned(), path_str(&request.exe)];
                args.extend(request.args.iter().cloned());
                (runtime.launcher_path.clone(), args)
            }
        }
        _ => (request.exe.clone(), request.args.clone()),
    };

    match merge_dll_overrides(
        host.env.get("WINEDLLOVERRIDES").map(String::as_str),
        options.dll_overrides.as_deref(),
    ) {
        Some(merged) => {
            env.insert("WINEDLLOVERRIDES".to_owned(), merged);
        }
        None => {
            env.remove("WINEDLLOVERRIDES");
        }
    }

    env.extend(options.extra_env.iter().map(|(k, v)| (k.clone(), v.clone())));

    if options.use_gamemode {
        match host.find_tool(GAMEMODE_TOOL) {
            Some(wrapper) => {
                args.insert(0, path_str(&runner_path));
                runner_path = wrapper;
            }
            None => debug!("{GAMEMODE_TOOL} not found, launching without it"),
        }
    }

    Ok(LaunchSpec {
        runner_path,
        args,
        working_dir,
        env,
    })
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
