//! Bundled redistributable installers shipped with a game.

use crate::deps::run_components;
use crate::progress::Progress;
use crate::CoreError;
use cellar_runtime::{
    compat_env, runtime_command, CommandRunner, HostContext, Runtime,
};
use cellar_store::{content_signature, is_success_code, resolve_paths, EnvPaths, PackageStateStore};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const REDIST_DIR: &str = "_CommonRedist";
pub const PACKAGE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Installer classes, in the order they are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerKind {
    VcRedistX86,
    VcRedistX64,
    GraphicsRuntime,
    Unknown,
}

impl InstallerKind {
    pub fn silent_flags(self) -> &'static [&'static str] {
        match self {
            InstallerKind::VcRedistX86 | InstallerKind::VcRedistX64 => {
                &["/install", "/quiet", "/norestart"]
            }
            InstallerKind::GraphicsRuntime => &["/silent"],
            InstallerKind::Unknown => &[],
        }
    }
}

/// Classify an installer by its file name alone.
pub fn classify_installer(file_name: &str) -> InstallerKind {
    let name = file_name.to_lowercase();
    let is_vc = name.contains("vcredist") || name.contains("vc_redist");
    if is_vc && name.contains("x86") {
        InstallerKind::VcRedistX86
    } else if is_vc && (name.contains("x64") || name.contains("amd64")) {
        InstallerKind::VcRedistX64
    } else if name.contains("dxsetup") || name.contains("directx") {
        InstallerKind::GraphicsRuntime
    } else {
        InstallerKind::Unknown
    }
}

fn find_redist_dir(install_dir: &Path) -> Option<PathBuf> {
    fs::read_dir(install_dir)
        .ok()?
        .flatten()
        .find(|e| {
            e.file_name().to_string_lossy().eq_ignore_ascii_case(REDIST_DIR)
                && e.path().is_dir()
        })
        .map(|e| e.path())
}

fn collect_executables(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if ft.is_dir() {
            collect_executables(&path, out);
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
        {
            out.push(path);
        }
    }
}

/// Known installers under `<install_dir>/_CommonRedist`, in run order.
///
/// `None` when the game ships no redistributables directory.
pub fn find_installers(install_dir: &Path) -> Option<Vec<(InstallerKind, PathBuf)>> {
    let redist = find_redist_dir(install_dir)?;
    let mut exes = Vec::new();
    collect_executables(&redist, &mut exes);
    exes.sort();
    exes.dedup();

    let mut queue: Vec<(InstallerKind, PathBuf)> = exes
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            match classify_installer(&name) {
                InstallerKind::Unknown => {
                    debug!("ignoring unrecognized installer {}", path.display());
                    None
                }
                kind => Some((kind, path)),
            }
        })
        .collect();
    queue.sort_by_key(|(kind, _)| *kind);
    Some(queue)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    /// At least one installer was executed.
    pub ran: bool,
    /// Every executed installer succeeded.
    pub ok: bool,
    pub details: Vec<String>,
}

impl PackageReport {
    fn skipped(detail: &str) -> Self {
        Self {
            ran: false,
            ok: true,
            details: vec![detail.to_owned()],
        }
    }
}

pub struct PackageInstaller<'a> {
    runner: &'a dyn CommandRunner,
    host: &'a HostContext,
    progress: &'a Progress,
}

impl<'a> PackageInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner, host: &'a HostContext, progress: &'a Progress) -> Self {
        Self {
            runner,
            host,
            progress,
        }
    }

    /// Run the game's bundled redistributables inside `env_root`.
    ///
    /// Installers unchanged since a successful run are skipped. Failures are
    /// folded into the report; only path resolution can error.
    pub async fn ensure_extra_packages(
        &self,
        install_dir: &Path,
        env_root: &Path,
        runtime: &Runtime,
    ) -> Result<PackageReport, CoreError> {
        let Some(queue) = find_installers(install_dir) else {
            return Ok(PackageReport::skipped(&format!("no {REDIST_DIR} directory")));
        };
        if queue.is_empty() {
            return Ok(PackageReport::skipped("no known installers"));
        }

        let paths = resolve_paths(env_root, false)?;
        let store = PackageStateStore::new(&paths.metadata_dir);
        let mut state = store.read();
        let mut report = PackageReport {
            ran: false,
            ok: true,
            details: Vec::new(),
        };

        for (kind, installer) in queue {
            let name = installer
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            let signature = match content_signature(&installer) {
                Ok(sig) => sig,
                Err(e) => {
                    warn!("cannot stat {}: {e}", installer.display());
                    report.ok = false;
                    report.details.push(format!("{name}: unreadable ({e})"));
                    continue;
                }
            };
            if state.should_skip(&installer, signature) {
                report.details.push(format!("{name}: already installed"));
                continue;
            }

            self.progress.report(&format!("Installing {name}"));
            let code = self.run_installer(kind, &installer, runtime, &paths).await;
            let success = is_success_code(code);
            report.ran = true;
            report.ok &= success;
            report.details.push(if success {
                format!("{name}: installed (exit {code})")
            } else {
                format!("{name}: failed (exit {code})")
            });

            state.record(&installer, signature, code);
            if let Err(e) = store.write(&state) {
                warn!("failed to persist package state {}: {e}", store.path().display());
            }
        }
        Ok(report)
    }

    async fn run_installer(
        &self,
        kind: InstallerKind,
        installer: &Path,
        runtime: &Runtime,
        paths: &EnvPaths,
    ) -> i32 {
        let mut args = vec![installer.to_string_lossy().into_owned()];
        args.extend(kind.silent_flags().iter().map(|f| (*f).to_owned()));
        let mut spec = match runtime_command(runtime, paths, args) {
            Ok(cmd) => cmd.envs(compat_env(runtime, paths, self.host)),
            Err(e) => {
                warn!("cannot run {}: {e}", installer.display());
                return -1;
            }
        };
        if let Some(dir) = installer.parent() {
            spec = spec.current_dir(dir);
        }
        let outcome = self.runner.run(&spec, PACKAGE_TIMEOUT).await;
        if !outcome.success() {
            warn!("{} finished with {outcome}", installer.display());
        }
        outcome.recorded_code()
    }
}

/// Install named components into an environment, outside any bookkeeping.
pub async fn install_extra_components(
    runner: &dyn CommandRunner,
    host: &HostContext,
    env_root: &Path,
    runtime: &Runtime,
    names: &[String],
    progress: &Progress,
) -> Result<bool, CoreError> {
    let paths = resolve_paths(env_root, false)?;
    Ok(run_components(runner, host, runtime, &paths, names, progress).await)
}
