//! Base initialization and prerequisite installation for one environment.

use crate::progress::Progress;
use crate::CoreError;
use cellar_runtime::{
    compat_env, runtime_command, CommandRunner, CommandSpec, HostContext, Runtime,
    PREREQUISITE_TOOL,
};
use cellar_schema::Slug;
use cellar_store::{resolve_paths, EnvPaths, EnvironmentMetadata, MetadataStore};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const BOOT_TIMEOUT: Duration = Duration::from_secs(60);
pub const WINESERVER_KILL_TIMEOUT: Duration = Duration::from_secs(10);
pub const PREREQUISITE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const CPP_RUNTIME_VERB: &str = "vcrun2022";
const CORE_FONTS_VERB: &str = "corefonts";

/// Brings an environment to the "booted, prerequisites installed" state.
pub struct DependencyInstaller<'a> {
    runner: &'a dyn CommandRunner,
    host: &'a HostContext,
    progress: &'a Progress,
    install_core_fonts: bool,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner, host: &'a HostContext, progress: &'a Progress) -> Self {
        Self {
            runner,
            host,
            progress,
            install_core_fonts: false,
        }
    }

    #[must_use]
    pub fn with_core_fonts(mut self, enabled: bool) -> Self {
        self.install_core_fonts = enabled;
        self
    }

    fn verbs(&self) -> Vec<&'static str> {
        let mut verbs = vec![CPP_RUNTIME_VERB];
        if self.install_core_fonts {
            verbs.push(CORE_FONTS_VERB);
        }
        verbs
    }

    /// Make the environment at `env_root` ready for `runtime`.
    ///
    /// Returns `Ok(true)` when base initialization is done and prerequisites
    /// are installed (or skipped because the tool is missing), `Ok(false)` when
    /// a step failed. Only path resolution failures are errors.
    pub async fn ensure_ready(
        &self,
        env_root: &Path,
        runtime: &Runtime,
        allow_migrate: bool,
        slug: Option<&Slug>,
    ) -> Result<bool, CoreError> {
        let paths = resolve_paths(env_root, allow_migrate)?;
        let store = MetadataStore::new(&paths.metadata_dir);
        let fingerprint = &runtime.fingerprint;

        // Unreadable (not missing or corrupt) metadata is never overwritten.
        let existing = store.read()?;
        if existing.as_ref().is_some_and(|m| m.is_ready_for(fingerprint)) {
            debug!("{} already ready for runtime {fingerprint}", env_root.display());
            return Ok(true);
        }

        let mut meta = existing.unwrap_or_else(|| EnvironmentMetadata::new(slug, fingerprint));
        if !meta.is_bound_to(fingerprint) {
            // Unmanaged prefixes are rebound in place rather than recreated.
            info!("binding {} to runtime {fingerprint}", env_root.display());
            meta.bound_runtime = Some(fingerprint.clone());
            meta.base_init_done = false;
            meta.reset_prerequisite();
        }
        if meta.slug.is_none() {
            meta.slug = slug.map(ToString::to_string);
        }
        persist(&store, &meta);

        let mut boot_ok = true;
        if !meta.base_init_done {
            boot_ok = self.boot(runtime, &paths).await;
            meta.base_init_done = true;
            persist(&store, &meta);
        }

        let prereq_ok = self.install_prerequisites(runtime, &paths, &store, &mut meta).await;
        Ok(boot_ok && prereq_ok)
    }

    async fn boot(&self, runtime: &Runtime, paths: &EnvPaths) -> bool {
        self.progress.report("Initializing compatibility prefix");
        let env = compat_env(runtime, paths, self.host);

        if let Some(wineserver) = runtime.wineserver_binary() {
            let kill = CommandSpec::new(wineserver).arg("-k").envs(env.clone());
            let outcome = self.runner.run(&kill, WINESERVER_KILL_TIMEOUT).await;
            debug!("stale wineserver shutdown: {outcome}");
        }

        let boot = match runtime_command(runtime, paths, ["wineboot", "-u"]) {
            Ok(cmd) => cmd.envs(env),
            Err(e) => {
                warn!("cannot boot {}: {e}", paths.compat_home.display());
                self.progress.report(&format!("Prefix initialization skipped: {e}"));
                return false;
            }
        };
        let outcome = self.runner.run(&boot, BOOT_TIMEOUT).await;
        if outcome.success() {
            true
        } else {
            warn!("prefix boot failed for {}: {outcome}", paths.compat_home.display());
            self.progress.report(&format!("Prefix initialization failed ({outcome})"));
            false
        }
    }

    async fn install_prerequisites(
        &self,
        runtime: &Runtime,
        paths: &EnvPaths,
        store: &MetadataStore,
        meta: &mut EnvironmentMetadata,
    ) -> bool {
        if meta.prerequisite.is_success() {
            return true;
        }
        let Some(tool) = self.runner.find_tool(PREREQUISITE_TOOL) else {
            self.progress
                .report(&format!("{PREREQUISITE_TOOL} not found; skipping prerequisite components"));
            return true;
        };
        if !meta.prerequisite.attempts_remaining() {
            debug!(
                "prerequisite attempts exhausted for {} ({} tries)",
                paths.metadata_dir.display(),
                meta.prerequisite.attempts
            );
            return false;
        }

        let env = prerequisite_env(runtime, paths, self.host);
        let mut all_ok = true;
        for verb in self.verbs() {
            self.progress.report(&format!("Installing {verb}"));
            let spec = CommandSpec::new(&tool)
                .args(["-q", verb])
                .envs(env.clone());
            let outcome = self.runner.run(&spec, PREREQUISITE_TIMEOUT).await;
            if !outcome.success() {
                warn!("{PREREQUISITE_TOOL} {verb} failed: {outcome}");
                all_ok = false;
            }
        }

        meta.prerequisite.attempts += 1;
        meta.prerequisite.last_attempt_at = Some(chrono::Utc::now().to_rfc3339());
        meta.prerequisite.tool = Some(PREREQUISITE_TOOL.to_owned());
        meta.prerequisite.ok = Some(all_ok);
        persist(store, meta);
        all_ok
    }
}

fn prerequisite_env(runtime: &Runtime, paths: &EnvPaths, host: &HostContext) -> BTreeMap<String, String> {
    let mut env = compat_env(runtime, paths, host);
    // The component tool only needs the prefix and the runtime's binaries.
    env.retain(|k, _| matches!(k.as_str(), "WINEPREFIX" | "WINE" | "WINESERVER"));
    env
}

fn persist(store: &MetadataStore, meta: &EnvironmentMetadata) {
    if let Err(e) = store.write(meta) {
        warn!("failed to persist metadata {}: {e}", store.path().display());
    }
}

/// Run `winetricks -q <name>` for each name, bypassing metadata bookkeeping.
pub(crate) async fn run_components(
    runner: &dyn CommandRunner,
    host: &HostContext,
    runtime: &Runtime,
    paths: &EnvPaths,
    names: &[String],
    progress: &Progress,
) -> bool {
    let Some(tool) = runner.find_tool(PREREQUISITE_TOOL) else {
        progress.report(&format!("{PREREQUISITE_TOOL} not found"));
        return false;
    };
    let env = prerequisite_env(runtime, paths, host);
    let mut all_ok = true;
    for name in names {
        progress.report(&format!("Installing {name}"));
        let spec = CommandSpec::new(&tool).arg("-q").arg(name.as_str()).envs(env.clone());
        let outcome = runner.run(&spec, PREREQUISITE_TIMEOUT).await;
        if !outcome.success() {
            warn!("{PREREQUISITE_TOOL} {name} failed: {outcome}");
            all_ok = false;
        }
    }
    all_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_runtime::{DiscoverySource, ExitOutcome, MockRunner};
    use cellar_store::MAX_PREREQUISITE_ATTEMPTS;
    use std::path::PathBuf;

    fn runtime(dir: &Path) -> Runtime {
        let root = dir.join("Proton 9.0");
        std::fs::create_dir_all(root.join("files/bin")).unwrap();
        std::fs::write(root.join("proton"), "").unwrap();
        std::fs::write(root.join("files/bin/wine"), "").unwrap();
        std::fs::write(root.join("files/bin/wineserver"), "").unwrap();
        Runtime::from_root(&root, DiscoverySource::Custom).unwrap()
    }

    fn host(dir: &Path) -> HostContext {
        HostContext {
            data_dir: dir.to_path_buf(),
            ..HostContext::default()
        }
    }

    fn read_meta(env: &Path) -> EnvironmentMetadata {
        MetadataStore::new(env).read().unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_run_boots_and_installs() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("prefixes/game-1");
        let mock = MockRunner::new().with_tool(PREREQUISITE_TOOL);
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress).with_core_fonts(true);

        let slug = Slug::parse("game").unwrap();
        assert!(installer.ensure_ready(&env, &rt, true, Some(&slug)).await.unwrap());

        assert_eq!(mock.count_matching("wineboot"), 1);
        assert_eq!(mock.count_matching("-k"), 1);
        assert_eq!(mock.count_matching("vcrun2022"), 1);
        assert_eq!(mock.count_matching("corefonts"), 1);
        assert!(env.join("pfx/system.reg").is_file());

        let meta = read_meta(&env);
        assert!(meta.base_init_done);
        assert_eq!(meta.prerequisite.ok, Some(true));
        assert_eq!(meta.prerequisite.attempts, 1);
        assert_eq!(meta.prerequisite.tool.as_deref(), Some(PREREQUISITE_TOOL));
        assert_eq!(meta.slug.as_deref(), Some("game"));
        assert!(meta.is_bound_to(&rt.fingerprint));

        let call = mock
            .calls()
            .into_iter()
            .find(|c| c.mentions("vcrun2022"))
            .unwrap();
        assert_eq!(call.env["WINEPREFIX"], env.join("pfx").to_string_lossy());
        assert!(call.env.contains_key("WINE"));
        assert!(!call.env.contains_key("STEAM_COMPAT_DATA_PATH"));
    }

    #[tokio::test]
    async fn ready_environment_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("env");
        let mock = MockRunner::new().with_tool(PREREQUISITE_TOOL);
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);

        assert!(installer.ensure_ready(&env, &rt, true, None).await.unwrap());
        mock.clear_calls();
        assert!(installer.ensure_ready(&env, &rt, true, None).await.unwrap());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn prerequisite_failures_cap_at_two_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("env");
        let mock = MockRunner::new()
            .with_tool(PREREQUISITE_TOOL)
            .on("vcrun2022", ExitOutcome::Exited(1));
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);

        for _ in 0..4 {
            assert!(!installer.ensure_ready(&env, &rt, true, None).await.unwrap());
        }
        assert_eq!(mock.count_matching("vcrun2022"), MAX_PREREQUISITE_ATTEMPTS as usize);
        assert_eq!(mock.count_matching("wineboot"), 1);
        let meta = read_meta(&env);
        assert_eq!(meta.prerequisite.attempts, MAX_PREREQUISITE_ATTEMPTS);
        assert_eq!(meta.prerequisite.ok, Some(false));
    }

    #[tokio::test]
    async fn missing_tool_is_skipped_and_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("env");
        let mock = MockRunner::new();
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);

        assert!(installer.ensure_ready(&env, &rt, true, None).await.unwrap());
        let meta = read_meta(&env);
        assert!(meta.base_init_done);
        assert_eq!(meta.prerequisite.attempts, 0);
        assert_eq!(meta.prerequisite.ok, None);
    }

    #[tokio::test]
    async fn failed_boot_is_reported_but_marked_done() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("env");
        let mock = MockRunner::new().on("wineboot", ExitOutcome::TimedOut);
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);

        assert!(!installer.ensure_ready(&env, &rt, true, None).await.unwrap());
        assert!(read_meta(&env).base_init_done);
        assert!(installer.ensure_ready(&env, &rt, true, None).await.unwrap());
        assert_eq!(mock.count_matching("wineboot"), 1);
    }

    #[tokio::test]
    async fn unmanaged_prefix_is_rebound_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("my-prefix");
        std::fs::create_dir_all(env.join("drive_c")).unwrap();
        let mut stale = EnvironmentMetadata::new(None, &"000000000000".into());
        stale.base_init_done = true;
        MetadataStore::new(&env).write(&stale).unwrap();

        let mock = MockRunner::new();
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);
        assert!(installer.ensure_ready(&env, &rt, false, None).await.unwrap());

        assert!(!env.join("pfx").exists());
        assert_eq!(mock.count_matching("wineboot"), 1);
        let meta = read_meta(&env);
        assert!(meta.is_bound_to(&rt.fingerprint));
        let boot = mock.calls().into_iter().find(|c| c.mentions("wineboot")).unwrap();
        assert_eq!(PathBuf::from(&boot.env["WINEPREFIX"]), env);
        assert!(boot.program.ends_with("files/bin/wine"));
        assert_ne!(boot.program, rt.launcher_path);
    }

    #[tokio::test]
    async fn unreadable_metadata_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let env = dir.path().join("prefixes/game-1");
        std::fs::create_dir_all(env.join("pfx")).unwrap();
        // A directory where the record should be makes the read fail with EISDIR.
        std::fs::create_dir_all(env.join(".cellar-env.json")).unwrap();

        let mock = MockRunner::new();
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);
        let err = installer.ensure_ready(&env, &rt, true, None).await.unwrap_err();

        assert!(matches!(err, CoreError::Store(_)));
        assert!(mock.calls().is_empty());
        assert!(env.join(".cellar-env.json").is_dir());
    }

    #[tokio::test]
    async fn flat_prefix_without_bundled_wine_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Proton 9.0");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("proton"), "").unwrap();
        let rt = Runtime::from_root(&root, DiscoverySource::Custom).unwrap();
        let env = dir.path().join("my-prefix");
        std::fs::create_dir_all(env.join("drive_c")).unwrap();

        let mock = MockRunner::new();
        let ctx = host(dir.path());
        let progress = Progress::default();
        let installer = DependencyInstaller::new(&mock, &ctx, &progress);
        assert!(!installer.ensure_ready(&env, &rt, false, None).await.unwrap());

        assert!(!env.join("pfx").exists());
        assert!(mock.calls().iter().all(|c| c.program != rt.launcher_path));
    }
}
