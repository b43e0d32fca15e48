use crate::config::CellarConfig;
use crate::deps::DependencyInstaller;
use crate::packages::{install_extra_components, PackageInstaller, PackageReport};
use crate::progress::{Progress, ProgressFn};
use crate::single_flight::{SharedResult, SingleFlight};
use crate::CoreError;
use cellar_runtime::{
    build_launch_spec, discover_runtimes, CommandRunner, HostContext, LaunchRequest, LaunchSpec,
    Runtime, SearchRoots, TokioRunner,
};
use cellar_schema::{parse_launch_line, slugify, GameInfo, LaunchOptions, RuntimeFingerprint, Slug};
use cellar_store::{
    copy_tree, remove_tree, resolve_paths, EnvPaths, EnvironmentMetadata, MetadataStore,
    PackageInstallState, PackageStateStore, StoreLayout,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type TargetKey = (Slug, RuntimeFingerprint, bool);

/// Provisioning service for compatibility environments.
///
/// Cheap to clone; clones share the runtime cache and in-flight maps.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

struct Inner {
    layout: StoreLayout,
    config: Mutex<CellarConfig>,
    config_path: Option<PathBuf>,
    runner: Arc<dyn CommandRunner>,
    host: HostContext,
    search_roots: SearchRoots,
    progress: Progress,
    runtime_cache: Mutex<Option<Vec<Runtime>>>,
    templates: SingleFlight<RuntimeFingerprint, PathBuf>,
    targets: SingleFlight<TargetKey, PathBuf>,
}

pub struct ProvisionerBuilder {
    data_dir: PathBuf,
    config: CellarConfig,
    config_path: Option<PathBuf>,
    runner: Option<Arc<dyn CommandRunner>>,
    host: Option<HostContext>,
    search_roots: Option<SearchRoots>,
    progress: Progress,
}

impl ProvisionerBuilder {
    /// Persist runtime choices back to this config file.
    #[must_use]
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    #[must_use]
    pub fn host(mut self, host: HostContext) -> Self {
        self.host = Some(host);
        self
    }

    #[must_use]
    pub fn search_roots(mut self, roots: SearchRoots) -> Self {
        self.search_roots = Some(roots);
        self
    }

    #[must_use]
    pub fn progress(mut self, callback: ProgressFn) -> Self {
        self.progress = Progress::new(callback);
        self
    }

    pub fn build(self) -> Provisioner {
        let layout = StoreLayout::new(&self.data_dir);
        let host = self.host.unwrap_or_else(|| {
            HostContext::from_process(&self.data_dir, self.config.steam_root.as_deref())
        });
        let search_roots = self.search_roots.unwrap_or_else(|| {
            SearchRoots::from_env(
                Some(layout.runtimes_dir()),
                self.config.custom_runtime_root.clone(),
            )
        });
        Provisioner {
            inner: Arc::new(Inner {
                layout,
                config: Mutex::new(self.config),
                config_path: self.config_path,
                runner: self.runner.unwrap_or_else(|| Arc::new(TokioRunner)),
                host,
                search_roots,
                progress: self.progress,
                runtime_cache: Mutex::new(None),
                templates: SingleFlight::new(),
                targets: SingleFlight::new(),
            }),
        }
    }
}

/// Outcome of one orchestration stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub ok: bool,
    pub detail: String,
}

impl StageReport {
    fn new(stage: &str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            stage: stage.to_owned(),
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub spec: LaunchSpec,
    pub stages: Vec<StageReport>,
}

/// Both persisted records of an environment.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    pub metadata_dir: PathBuf,
    pub compat_home: PathBuf,
    pub metadata: Option<EnvironmentMetadata>,
    pub packages: PackageInstallState,
}

impl Provisioner {
    pub fn builder(data_dir: impl Into<PathBuf>, config: CellarConfig) -> ProvisionerBuilder {
        ProvisionerBuilder {
            data_dir: data_dir.into(),
            config,
            config_path: None,
            runner: None,
            host: None,
            search_roots: None,
            progress: Progress::default(),
        }
    }

    /// Service over the user's config and data directory with real processes.
    pub fn from_default_config() -> Result<Self, CoreError> {
        let (config, path) = CellarConfig::load_default()?;
        let data_dir = config.resolve_data_dir()?;
        Ok(Self::builder(data_dir, config).config_path(path).build())
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.inner.layout
    }

    pub fn config(&self) -> CellarConfig {
        self.inner.lock_config().clone()
    }

    /// Discovered runtimes, cached until `force_rescan`.
    pub fn list_runtimes(&self, force_rescan: bool) -> Vec<Runtime> {
        let mut cache = self
            .inner
            .runtime_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !force_rescan {
            if let Some(cached) = cache.as_ref() {
                return cached.clone();
            }
        }
        let found = discover_runtimes(&self.inner.search_roots);
        *cache = Some(found.clone());
        found
    }

    /// The saved default runtime if it is still installed, else the best ranked
    /// one, which then becomes the saved default.
    pub fn find_best_runtime(&self) -> Option<Runtime> {
        let runtimes = self.list_runtimes(false);
        let saved = self.inner.lock_config().default_runtime.clone();
        if let Some(saved) = saved {
            if let Some(rt) = runtimes.iter().find(|rt| {
                rt.root_path == saved || rt.launcher_path == saved || rt.resolved_launcher == saved
            }) {
                return Some(rt.clone());
            }
            debug!("saved default runtime {} no longer installed", saved.display());
        }

        let best = cellar_runtime::find_best_runtime(&runtimes)?.clone();
        self.inner.save_default_runtime(&best);
        Some(best)
    }

    fn resolve_runtime(&self, runtime: Option<&Runtime>) -> Result<Runtime, CoreError> {
        match runtime {
            Some(rt) => Ok(rt.clone()),
            None => self.find_best_runtime().ok_or(CoreError::NoRuntime),
        }
    }

    /// Ensure the shared template environment exists and is ready.
    pub async fn ensure_default_environment(&self, runtime: Option<&Runtime>) -> Result<PathBuf, CoreError> {
        let runtime = self.resolve_runtime(runtime)?;
        Inner::ensure_template(&self.inner, runtime).await
    }

    /// Ensure the environment for `slug` exists, cloned from the template.
    pub async fn ensure_target_environment(
        &self,
        slug: &str,
        runtime: Option<&Runtime>,
        force_recreate: bool,
    ) -> Result<PathBuf, CoreError> {
        let slug = Slug::parse(slug)?;
        if slug.is_template() {
            return Err(cellar_schema::SchemaError::ReservedSlug(slug.into_inner()).into());
        }
        let runtime = self.resolve_runtime(runtime)?;
        Inner::ensure_target(&self.inner, slug, runtime, force_recreate).await
    }

    /// Boot and prepare an existing, caller-owned prefix without restructuring it.
    pub async fn ensure_unmanaged_ready(&self, env_path: &Path, runtime: Option<&Runtime>) -> Result<bool, CoreError> {
        let runtime = self.resolve_runtime(runtime)?;
        self.inner
            .dependency_installer()
            .ensure_ready(env_path, &runtime, false, None)
            .await
    }

    pub async fn ensure_extra_packages(
        &self,
        install_dir: &Path,
        env_path: &Path,
        runtime: Option<&Runtime>,
    ) -> PackageReport {
        let runtime = match self.resolve_runtime(runtime) {
            Ok(rt) => rt,
            Err(e) => {
                return PackageReport {
                    ran: false,
                    ok: false,
                    details: vec![e.to_string()],
                }
            }
        };
        let installer = PackageInstaller::new(self.inner.runner.as_ref(), &self.inner.host, &self.inner.progress);
        match installer.ensure_extra_packages(install_dir, env_path, &runtime).await {
            Ok(report) => report,
            Err(e) => {
                warn!("package installation in {} failed: {e}", env_path.display());
                PackageReport {
                    ran: false,
                    ok: false,
                    details: vec![e.to_string()],
                }
            }
        }
    }

    /// Build a launch spec; spawns nothing.
    ///
    /// `env_override` is an unmanaged prefix used as is. Otherwise the managed
    /// environment for `slug` is used, migrating a legacy layout if needed.
    pub fn build_launch(
        &self,
        exe: &Path,
        args: &[String],
        slug: &str,
        runtime: Option<&Runtime>,
        options: &LaunchOptions,
        env_override: Option<&Path>,
    ) -> Result<LaunchSpec, CoreError> {
        let runtime = match runtime {
            Some(rt) => Some(rt.clone()),
            None => self.find_best_runtime(),
        };
        let env_paths = match &runtime {
            Some(rt) => Some(self.env_paths_for(slug, rt, env_override)?),
            None => {
                warn!("no runtime available, launching {} directly", exe.display());
                None
            }
        };
        let request = LaunchRequest {
            exe: exe.to_path_buf(),
            args: args.to_vec(),
            runtime,
            env_paths,
            options: options.clone(),
        };
        Ok(build_launch_spec(&request, &self.inner.host)?)
    }

    fn env_paths_for(&self, slug: &str, runtime: &Runtime, env_override: Option<&Path>) -> Result<EnvPaths, CoreError> {
        if let Some(path) = env_override {
            return Ok(resolve_paths(path, false)?);
        }
        let slug = Slug::parse(slug)?;
        let root = self.inner.layout.env_path(&slug, &runtime.fingerprint);
        Ok(resolve_paths(&root, true)?)
    }

    /// Run `winetricks -q <name>` for each name against an environment.
    pub async fn install_extra_components(&self, env_path: &Path, names: &[String]) -> bool {
        let Some(runtime) = self.find_best_runtime() else {
            self.inner.progress.report("No compatibility runtime found");
            return false;
        };
        install_extra_components(
            self.inner.runner.as_ref(),
            &self.inner.host,
            env_path,
            &runtime,
            names,
            &self.inner.progress,
        )
        .await
        .unwrap_or_else(|e| {
            warn!("component installation in {} failed: {e}", env_path.display());
            false
        })
    }

    /// Everything needed before a game starts, in order: runtime, environment,
    /// bundled packages, launch spec. Installer failures are reported per stage
    /// and never prevent the launch spec from being built.
    pub async fn prepare_launch(
        &self,
        game: &GameInfo,
        exe: &Path,
        args: &[String],
        options: &LaunchOptions,
    ) -> Result<LaunchReport, CoreError> {
        let mut stages = Vec::new();

        let runtime = self.runtime_for_game(game, &mut stages)?;

        let slug = match Slug::parse(&game.slug) {
            Ok(slug) => slug,
            Err(e) => slugify(&game.title).ok_or(e)?,
        };

        let env_root = match &game.environment_path {
            Some(path) => {
                let ready = self.ensure_unmanaged_ready(path, Some(&runtime)).await?;
                stages.push(StageReport::new("environment", ready, path.display().to_string()));
                path.clone()
            }
            None => {
                let path = self
                    .ensure_target_environment(&slug, Some(&runtime), false)
                    .await?;
                let ready = MetadataStore::new(&path)
                    .read()
                    .ok()
                    .flatten()
                    .is_some_and(|m| {
                        m.is_bound_to(&runtime.fingerprint)
                            && m.base_init_done
                            && m.prerequisite.ok != Some(false)
                    });
                stages.push(StageReport::new("environment", ready, path.display().to_string()));
                path
            }
        };

        let packages = self
            .ensure_extra_packages(&game.install_dir, &env_root, Some(&runtime))
            .await;
        stages.push(StageReport::new("packages", packages.ok, packages.details.join("; ")));

        let line = parse_launch_line(&game.launch_options);
        let mut options = options.clone();
        options.extra_env.extend(line.env);
        let mut all_args = args.to_vec();
        all_args.extend(line.args);

        let spec = self.build_launch(
            exe,
            &all_args,
            &slug,
            Some(&runtime),
            &options,
            game.environment_path.as_deref(),
        )?;
        stages.push(StageReport::new("launch", true, spec.runner_path.display().to_string()));
        Ok(LaunchReport { spec, stages })
    }

    fn runtime_for_game(&self, game: &GameInfo, stages: &mut Vec<StageReport>) -> Result<Runtime, CoreError> {
        if let Some(path) = &game.runtime_path {
            match Runtime::from_path(path) {
                Ok(rt) => {
                    stages.push(StageReport::new("runtime", true, rt.name.clone()));
                    return Ok(rt);
                }
                Err(e) => {
                    warn!("configured runtime unusable, falling back: {e}");
                    stages.push(StageReport::new("runtime", false, e.to_string()));
                }
            }
        }
        let rt = self.find_best_runtime().ok_or(CoreError::NoRuntime)?;
        stages.push(StageReport::new("runtime", true, rt.name.clone()));
        Ok(rt)
    }

    /// Read both records of an environment without modifying it.
    pub fn inspect(&self, env_path: &Path) -> Result<EnvironmentReport, CoreError> {
        let paths = resolve_paths(env_path, false)?;
        Ok(EnvironmentReport {
            metadata: MetadataStore::new(&paths.metadata_dir).read()?,
            packages: PackageStateStore::new(&paths.metadata_dir).read(),
            metadata_dir: paths.metadata_dir,
            compat_home: paths.compat_home,
        })
    }
}

impl Inner {
    fn lock_config(&self) -> std::sync::MutexGuard<'_, CellarConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save_default_runtime(&self, runtime: &Runtime) {
        let snapshot = {
            let mut config = self.lock_config();
            if config.default_runtime.as_ref() == Some(&runtime.root_path) {
                return;
            }
            config.default_runtime = Some(runtime.root_path.clone());
            config.clone()
        };
        info!("default runtime set to {}", runtime.name);
        if let Some(path) = &self.config_path {
            if let Err(e) = snapshot.save(path) {
                warn!("failed to save config {}: {e}", path.display());
            }
        }
    }

    fn dependency_installer(&self) -> DependencyInstaller<'_> {
        let fonts = self.lock_config().install_core_fonts;
        DependencyInstaller::new(self.runner.as_ref(), &self.host, &self.progress).with_core_fonts(fonts)
    }

    fn ensure_template(this: &Arc<Self>, runtime: Runtime) -> SharedResult<PathBuf> {
        let inner = Arc::clone(this);
        this.templates.run(runtime.fingerprint.clone(), async move {
            inner.provision_template(&runtime).await
        })
    }

    fn ensure_target(this: &Arc<Self>, slug: Slug, runtime: Runtime, force_recreate: bool) -> SharedResult<PathBuf> {
        let inner = Arc::clone(this);
        let key = (slug.clone(), runtime.fingerprint.clone(), force_recreate);
        this.targets.run(key, async move {
            let template = Inner::ensure_template(&inner, runtime.clone()).await?;
            inner
                .provision_target(&slug, &runtime, &template, force_recreate)
                .await
        })
    }

    async fn provision_template(&self, runtime: &Runtime) -> Result<PathBuf, CoreError> {
        let path = self.layout.template_path(&runtime.fingerprint);
        let existing = MetadataStore::new(&path).read()?;
        if existing.is_some_and(|m| m.bound_runtime.is_some() && !m.is_bound_to(&runtime.fingerprint)) {
            info!("template at {} bound to another runtime, recreating", path.display());
            remove_blocking(path.clone()).await?;
        }

        self.progress.report(&format!("Preparing template environment for {}", runtime.name));
        let ready = self
            .dependency_installer()
            .ensure_ready(&path, runtime, true, Some(&Slug::template()))
            .await?;
        if !ready {
            warn!("template environment {} is not fully ready", path.display());
        }
        Ok(path)
    }

    async fn provision_target(
        &self,
        slug: &Slug,
        runtime: &Runtime,
        template: &Path,
        force_recreate: bool,
    ) -> Result<PathBuf, CoreError> {
        let target = self.layout.env_path(slug, &runtime.fingerprint);
        let store = MetadataStore::new(&target);
        let existing = store.read()?;

        if let Some(owner) = existing.as_ref().and_then(|m| m.slug.as_deref()) {
            if owner != slug.as_str() {
                return Err(CoreError::SlugCollision {
                    slug: slug.to_string(),
                    existing: owner.to_owned(),
                    path: target.display().to_string(),
                });
            }
        }

        let recreate_reason = if force_recreate {
            Some("forced")
        } else if !target.exists() {
            Some("missing")
        } else {
            match &existing {
                None => Some("no metadata"),
                Some(m) if m.was_migrated() => Some("stale schema"),
                Some(m) if !m.is_bound_to(&runtime.fingerprint) => Some("runtime changed"),
                Some(_) => None,
            }
        };

        if let Some(reason) = recreate_reason {
            info!("recreating {} ({reason})", target.display());
            self.progress.report(&format!("Creating environment for {slug}"));
            self.clone_template(template, &target, slug, force_recreate).await?;
        }

        let ready = self
            .dependency_installer()
            .ensure_ready(&target, runtime, true, Some(slug))
            .await?;
        if !ready {
            warn!("environment {} is not fully ready", target.display());
        }
        Ok(target)
    }

    async fn clone_template(
        &self,
        template: &Path,
        target: &Path,
        slug: &Slug,
        reset_prerequisite: bool,
    ) -> Result<(), CoreError> {
        remove_blocking(target.to_path_buf()).await?;

        let (src, dst) = (template.to_path_buf(), target.to_path_buf());
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| CoreError::TaskFailed(e.to_string()))?;
        if let Err(e) = copied {
            warn!("cloning template into {} failed, initializing from scratch: {e}", target.display());
            if let Err(e) = remove_blocking(target.to_path_buf()).await {
                warn!("cannot remove partial clone {}: {e}", target.display());
            }
            return Ok(());
        }

        let store = MetadataStore::new(target);
        match store.read() {
            Ok(Some(mut meta)) => {
                meta.slug = Some(slug.to_string());
                if reset_prerequisite {
                    meta.reset_prerequisite();
                }
                if let Err(e) = store.write(&meta) {
                    warn!("failed to persist metadata {}: {e}", store.path().display());
                }
            }
            Ok(None) => debug!("template had no metadata to carry over"),
            Err(e) => warn!("cannot read cloned metadata: {e}"),
        }
        Ok(())
    }
}

async fn remove_blocking(path: PathBuf) -> Result<(), CoreError> {
    tokio::task::spawn_blocking(move || remove_tree(&path))
        .await
        .map_err(|e| CoreError::TaskFailed(e.to_string()))??;
    Ok(())
}
