use super::{colorize_ok, json_pretty, runtime_arg, spin_fail, spin_ok, CliError, Context, EXIT_SUCCESS};
use cellar_runtime::LaunchSpec;
use cellar_schema::{slugify, GameInfo, LaunchOptions, Slug};
use std::path::Path;

/// Keys worth showing in human output; the full env goes to `--json`.
const SHOWN_PREFIXES: &[&str] = &["STEAM", "Steam", "WINE", "PROTON", "DXVK", "VKD3D"];

pub fn run(
    ctx: &Context,
    exe: &Path,
    args: &[String],
    slug: Option<&str>,
    runtime: Option<&Path>,
    env: Option<&Path>,
    options: &LaunchOptions,
) -> Result<u8, CliError> {
    let runtime = runtime_arg(runtime)?;
    let slug = match slug {
        Some(s) => s.to_owned(),
        None => default_slug(exe)?,
    };
    let spec = ctx
        .svc
        .build_launch(exe, args, &slug, runtime.as_ref(), options, env)
        ?;

    if ctx.json {
        println!("{}", json_pretty(&spec)?);
    } else {
        print_spec(&spec);
    }
    Ok(EXIT_SUCCESS)
}

/// Run every pre-launch stage for a game and print the resulting spec.
pub async fn run_prepare(
    ctx: &Context,
    game: &GameInfo,
    exe: &Path,
    args: &[String],
    options: &LaunchOptions,
) -> Result<u8, CliError> {
    let pb = ctx.start_spinner(&format!("preparing {}...", game.title));
    let report = match ctx.svc.prepare_launch(game, exe, args, options).await {
        Ok(report) => {
            spin_ok(pb, &format!("{} ready to launch", game.title));
            report
        }
        Err(e) => {
            spin_fail(pb, &format!("{} cannot be prepared", game.title));
            return Err(e.into());
        }
    };

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        for stage in &report.stages {
            println!("{:<12} {:<8} {}", stage.stage, colorize_ok(stage.ok), stage.detail);
        }
        println!();
        print_spec(&report.spec);
    }
    Ok(EXIT_SUCCESS)
}

fn default_slug(exe: &Path) -> Result<String, String> {
    exe.file_stem()
        .and_then(|stem| slugify(&stem.to_string_lossy()))
        .map(Slug::into_inner)
        .ok_or_else(|| format!("cannot derive a slug from '{}', pass --slug", exe.display()))
}

fn print_spec(spec: &LaunchSpec) {
    println!("runner: {}", spec.runner_path.display());
    println!("args:   {}", spec.args.join(" "));
    println!("cwd:    {}", spec.working_dir.display());
    println!("env:");
    for (key, value) in spec
        .env
        .iter()
        .filter(|(k, _)| SHOWN_PREFIXES.iter().any(|p| k.starts_with(p)))
    {
        println!("  {key}={value}");
    }
    println!("  ({} variables total)", spec.env.len());
}
