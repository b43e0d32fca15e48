use super::{json_pretty, runtime_arg, spin_fail, spin_ok, CliError, Context, EXIT_SUCCESS};
use std::path::Path;

pub async fn run_default(ctx: &Context, runtime: Option<&Path>) -> Result<u8, CliError> {
    let runtime = runtime_arg(runtime)?;
    let pb = ctx.start_spinner("preparing template environment...");
    match ctx.svc.ensure_default_environment(runtime.as_ref()).await {
        Ok(path) => {
            spin_ok(pb, "template environment ready");
            print_path(ctx, "default", &path)
        }
        Err(e) => {
            spin_fail(pb, "template environment failed");
            Err(e.into())
        }
    }
}

pub async fn run_target(
    ctx: &Context,
    slug: &str,
    runtime: Option<&Path>,
    force: bool,
) -> Result<u8, CliError> {
    let runtime = runtime_arg(runtime)?;
    let pb = ctx.start_spinner(&format!("preparing environment '{slug}'..."));
    match ctx
        .svc
        .ensure_target_environment(slug, runtime.as_ref(), force)
        .await
    {
        Ok(path) => {
            spin_ok(pb, &format!("environment '{slug}' ready"));
            print_path(ctx, slug, &path)
        }
        Err(e) => {
            spin_fail(pb, &format!("environment '{slug}' failed"));
            Err(e.into())
        }
    }
}

fn print_path(ctx: &Context, slug: &str, path: &Path) -> Result<u8, CliError> {
    if ctx.json {
        let out = serde_json::json!({
            "slug": slug,
            "path": path,
        });
        println!("{}", json_pretty(&out)?);
    } else {
        println!("{}", path.display());
    }
    Ok(EXIT_SUCCESS)
}
