mod commands;

use cellar_core::{CellarConfig, Provisioner};
use cellar_schema::{GameInfo, LaunchOptions};
use clap::{Args, Parser, Subcommand};
use commands::{CliError, Context};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "cellar",
    version,
    about = "Provisions isolated compatibility environments for Windows games"
)]
struct Cli {
    /// Root for environments, managed runtimes, and logs.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List installed compatibility runtimes; `*` marks the one in use.
    Runtimes {
        /// Ignore the cached scan.
        #[arg(long, default_value_t = false)]
        rescan: bool,
    },
    /// Create or repair the shared template environment.
    EnsureDefault {
        /// Runtime root or launcher to bind to.
        #[arg(long)]
        runtime: Option<PathBuf>,
    },
    /// Create or repair the environment for a game.
    Ensure {
        slug: String,
        #[arg(long)]
        runtime: Option<PathBuf>,
        /// Discard the existing environment and clone it again.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Run the installers a game ships under `_CommonRedist`.
    Packages {
        install_dir: PathBuf,
        /// Environment root to install into.
        #[arg(long)]
        env: PathBuf,
        #[arg(long)]
        runtime: Option<PathBuf>,
    },
    /// Print how an executable would be launched, without running it.
    LaunchSpec {
        exe: PathBuf,
        /// Environment slug (default: derived from the executable name).
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        runtime: Option<PathBuf>,
        /// Use an existing prefix instead of a managed environment.
        #[arg(long)]
        env: Option<PathBuf>,
        #[command(flatten)]
        launch: LaunchFlags,
        /// Arguments passed to the executable.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Prepare runtime, environment, and packages for a game, then print its launch spec.
    Prepare {
        exe: PathBuf,
        /// Game title; also the slug source when `--slug` is not usable.
        #[arg(long)]
        title: String,
        /// Game installation directory.
        #[arg(long)]
        install_dir: PathBuf,
        #[arg(long, default_value = "")]
        slug: String,
        #[arg(long)]
        runtime: Option<PathBuf>,
        #[arg(long)]
        env: Option<PathBuf>,
        /// Launch option line, e.g. `DXVK_HUD=1 %command% -windowed`.
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        launch_options: String,
        #[command(flatten)]
        launch: LaunchFlags,
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Install named components into an environment.
    InstallComponents {
        env: PathBuf,
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Show the state records of an environment.
    Inspect { env: PathBuf },
    /// Check runtimes, the data directory, and host tools.
    Doctor,
}

#[derive(Debug, Args)]
struct LaunchFlags {
    /// App id exported to the runtime.
    #[arg(long)]
    app_id: Option<String>,
    /// Wrap the launch with gamemode when available.
    #[arg(long, default_value_t = false)]
    gamemode: bool,
    /// Enable runtime logging.
    #[arg(long, default_value_t = false)]
    log: bool,
    /// Directory for runtime logs (implies --log).
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// `WINEDLLOVERRIDES` fragment, e.g. `dxgi=n,b`.
    #[arg(long)]
    dll_overrides: Option<String>,
    /// Extra environment variable, repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    set: Vec<(String, String)>,
}

impl LaunchFlags {
    fn into_options(self) -> LaunchOptions {
        LaunchOptions {
            app_id: self.app_id,
            enable_logging: self.log || self.log_dir.is_some(),
            log_dir: self.log_dir,
            use_gamemode: self.gamemode,
            dll_overrides: self.dll_overrides,
            extra_env: self.set.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CELLAR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let result = build_context(cli.data_dir, cli.json).and_then(|ctx| dispatch(&ctx, cli.command));

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn build_context(data_dir: Option<PathBuf>, json: bool) -> Result<Context, CliError> {
    let (config, config_path) = CellarConfig::load_default()?;
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => config.resolve_data_dir()?,
    };
    debug!("config {}, data dir {}", config_path.display(), data_dir.display());

    let progress = commands::progress_bar(json);
    let sink = progress.clone();
    let svc = Provisioner::builder(data_dir, config)
        .config_path(config_path)
        .progress(Arc::new(move |msg: &str| sink.set_message(msg.to_owned())))
        .build();

    Ok(Context { svc, json, progress })
}

fn dispatch(ctx: &Context, command: Commands) -> Result<u8, CliError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Other(format!("failed to start async runtime: {e}")))?;

    match command {
        Commands::Runtimes { rescan } => commands::runtimes::run(ctx, rescan),
        Commands::EnsureDefault { runtime } => {
            rt.block_on(commands::ensure::run_default(ctx, runtime.as_deref()))
        }
        Commands::Ensure {
            slug,
            runtime,
            force,
        } => rt.block_on(commands::ensure::run_target(
            ctx,
            &slug,
            runtime.as_deref(),
            force,
        )),
        Commands::Packages {
            install_dir,
            env,
            runtime,
        } => rt.block_on(commands::packages::run(
            ctx,
            &install_dir,
            &env,
            runtime.as_deref(),
        )),
        Commands::LaunchSpec {
            exe,
            slug,
            runtime,
            env,
            launch,
            args,
        } => commands::launch_spec::run(
            ctx,
            &exe,
            &args,
            slug.as_deref(),
            runtime.as_deref(),
            env.as_deref(),
            &launch.into_options(),
        ),
        Commands::Prepare {
            exe,
            title,
            install_dir,
            slug,
            runtime,
            env,
            launch_options,
            launch,
            args,
        } => {
            let game = GameInfo {
                slug,
                title,
                runtime_path: runtime,
                environment_path: env,
                install_dir,
                launch_options,
            };
            rt.block_on(commands::launch_spec::run_prepare(
                ctx,
                &game,
                &exe,
                &args,
                &launch.into_options(),
            ))
        }
        Commands::InstallComponents { env, names } => {
            rt.block_on(commands::components::run(ctx, &env, &names))
        }
        Commands::Inspect { env } => commands::inspect::run(ctx, &env),
        Commands::Doctor => commands::doctor::run(ctx),
    }
}
