use super::{colorize_ok, json_pretty, runtime_arg, spin_fail, spin_ok, CliError, Context, EXIT_FAILURE, EXIT_SUCCESS};
use std::path::Path;

pub async fn run(
    ctx: &Context,
    install_dir: &Path,
    env: &Path,
    runtime: Option<&Path>,
) -> Result<u8, CliError> {
    let runtime = runtime_arg(runtime)?;
    let pb = ctx.start_spinner("checking bundled installers...");
    let report = ctx
        .svc
        .ensure_extra_packages(install_dir, env, runtime.as_ref())
        .await;
    if report.ok {
        spin_ok(pb, "bundled installers done");
    } else {
        spin_fail(pb, "some bundled installers failed");
    }

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("ran:    {}", report.ran);
        println!("status: {}", colorize_ok(report.ok));
        for line in &report.details {
            println!("  {line}");
        }
    }
    Ok(if report.ok { EXIT_SUCCESS } else { EXIT_FAILURE })
}
