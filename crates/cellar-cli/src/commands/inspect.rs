use super::{colorize_ok, json_pretty, CliError, Context, EXIT_SUCCESS};
use std::path::Path;

pub fn run(ctx: &Context, env: &Path) -> Result<u8, CliError> {
    let report = ctx.svc.inspect(env)?;
    if ctx.json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("metadata_dir:   {}", report.metadata_dir.display());
    println!("compat_home:    {}", report.compat_home.display());
    match &report.metadata {
        Some(meta) => {
            println!("slug:           {}", meta.slug.as_deref().unwrap_or("(none)"));
            println!("schema:         v{}", meta.schema_version);
            println!(
                "runtime:        {}",
                meta.bound_runtime.as_deref().unwrap_or("(unbound)")
            );
            println!("base_init:      {}", meta.base_init_done);
            let prereq = match meta.prerequisite.ok {
                Some(ok) => colorize_ok(ok),
                None => "pending".to_owned(),
            };
            println!(
                "prerequisites:  {prereq} ({} attempts)",
                meta.prerequisite.attempts
            );
            println!("initialized_at: {}", meta.initialized_at);
            println!("updated_at:     {}", meta.updated_at);
        }
        None => println!("metadata:       (no data yet)"),
    }
    if report.packages.installers.is_empty() {
        println!("installers:     (no data yet)");
    } else {
        println!("installers:");
        for (path, record) in &report.packages.installers {
            println!("  {path} -> exit {} at {}", record.last_exit_code, record.at);
        }
    }
    Ok(EXIT_SUCCESS)
}
