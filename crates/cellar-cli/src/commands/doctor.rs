use super::{json_pretty, CliError, Context, EXIT_FAILURE, EXIT_SUCCESS};
use cellar_runtime::{check_host_tools, format_missing};
use serde::Serialize;
use std::fs;

pub fn run(ctx: &Context) -> Result<u8, CliError> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_runtimes(ctx, &mut checks, &mut all_pass);
    check_data_dir(ctx, &mut checks, &mut all_pass);
    check_tools(&mut checks);

    print_results(ctx, &checks, all_pass)
}

fn check_runtimes(ctx: &Context, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let runtimes = ctx.svc.list_runtimes(true);
    match ctx.svc.find_best_runtime() {
        Some(best) => checks.push(Check::pass(
            "runtimes",
            &format!("{} runtime(s) found, using {}", runtimes.len(), best.name),
        )),
        None => {
            *all_pass = false;
            checks.push(Check::fail("runtimes", "No compatibility runtime found"));
        }
    }
}

fn check_data_dir(ctx: &Context, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let layout = ctx.svc.layout();
    match layout.initialize() {
        Ok(()) => checks.push(Check::pass(
            "data_dir",
            &format!("Data directory writable: {}", layout.root().display()),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "data_dir",
                &format!("Data directory unusable: {e}"),
            ));
            return;
        }
    }

    let count = fs::read_dir(layout.prefixes_dir())
        .map(|entries| entries.filter_map(Result::ok).filter(|e| e.path().is_dir()).count())
        .unwrap_or(0);
    checks.push(Check::info("environments", &format!("{count} environment(s)")));
}

// Missing tools degrade provisioning but never block it.
fn check_tools(checks: &mut Vec<Check>) {
    let path_var = std::env::var("PATH").ok();
    let missing = check_host_tools(path_var.as_deref());
    if missing.is_empty() {
        checks.push(Check::pass("host_tools", "Host tools available"));
    } else {
        checks.push(Check::warn(
            "host_tools",
            &format!("Missing host tools: {}", format_missing(&missing)),
        ));
    }
}

fn print_results(ctx: &Context, checks: &[Check], all_pass: bool) -> Result<u8, CliError> {
    if ctx.json {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("Cellar Doctor\n");
        for check in checks {
            let icon = match check.status {
                Status::Pass => "✓",
                Status::Fail => "✗",
                Status::Warn => "⚠",
                Status::Info => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: Status,
    message: String,
}

impl Check {
    fn new(name: &str, status: Status, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, Status::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, Status::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, Status::Warn, message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, Status::Info, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_serializes_status_lowercase() {
        let check = Check::warn("host_tools", "Missing host tools: winetricks");
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "warn");
        assert_eq!(json["name"], "host_tools");
    }
}
