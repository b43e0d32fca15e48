use super::{json_pretty, spin_fail, spin_ok, CliError, Context, EXIT_FAILURE, EXIT_SUCCESS};
use std::path::Path;

pub async fn run(ctx: &Context, env: &Path, names: &[String]) -> Result<u8, CliError> {
    let pb = ctx.start_spinner(&format!("installing {}...", names.join(", ")));
    let ok = ctx.svc.install_extra_components(env, names).await;
    if ok {
        spin_ok(pb, "components installed");
    } else {
        spin_fail(pb, "component installation failed");
    }
    if ctx.json {
        let out = serde_json::json!({
            "env": env,
            "components": names,
            "ok": ok,
        });
        println!("{}", json_pretty(&out)?);
    }
    Ok(if ok { EXIT_SUCCESS } else { EXIT_FAILURE })
}
