use super::{json_pretty, CliError, Context, EXIT_SUCCESS};
use cellar_runtime::Runtime;
use serde::Serialize;

#[derive(Serialize)]
struct RuntimeRow<'a> {
    #[serde(flatten)]
    runtime: &'a Runtime,
    best: bool,
}

pub fn run(ctx: &Context, rescan: bool) -> Result<u8, CliError> {
    let runtimes = ctx.svc.list_runtimes(rescan);
    let best = ctx.svc.find_best_runtime();
    let rows: Vec<RuntimeRow<'_>> = runtimes
        .iter()
        .map(|rt| RuntimeRow {
            runtime: rt,
            best: best.as_ref().is_some_and(|b| b.fingerprint == rt.fingerprint),
        })
        .collect();

    if ctx.json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no runtimes found");
    } else {
        println!("{:<2} {:<32} {:<14} {:<14} PATH", "", "NAME", "SOURCE", "FINGERPRINT");
        for row in &rows {
            let marker = if row.best { "*" } else { "" };
            println!(
                "{:<2} {:<32} {:<14} {:<14} {}",
                marker,
                row.runtime.name,
                row.runtime.source.to_string(),
                row.runtime.fingerprint.as_str(),
                row.runtime.root_path.display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
