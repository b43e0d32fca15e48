pub mod components;
pub mod doctor;
pub mod ensure;
pub mod inspect;
pub mod launch_spec;
pub mod packages;
pub mod runtimes;

use cellar_core::{CoreError, Provisioner};
use cellar_runtime::Runtime;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NO_RUNTIME: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    Other(String),
}

impl From<String> for CliError {
    fn from(msg: String) -> Self {
        CliError::Other(msg)
    }
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Core(CoreError::NoRuntime) => EXIT_NO_RUNTIME,
            CliError::Core(CoreError::Store(_)) => EXIT_STORE_ERROR,
            _ => EXIT_FAILURE,
        }
    }
}

/// Shared state for one CLI invocation.
pub struct Context {
    pub svc: Provisioner,
    pub json: bool,
    /// Receives provisioning progress; hidden in JSON mode.
    pub progress: ProgressBar,
}

impl Context {
    pub fn start_spinner(&self, msg: &str) -> &ProgressBar {
        if !self.json {
            self.progress.set_style(spinner_style());
            self.progress.set_message(msg.to_owned());
            self.progress.enable_steady_tick(Duration::from_millis(80));
        }
        &self.progress
    }
}

/// `--runtime` argument, or `None` to let the service pick.
pub fn runtime_arg(path: Option<&Path>) -> Result<Option<Runtime>, String> {
    path.map(|p| Runtime::from_path(p).map_err(|e| e.to_string()))
        .transpose()
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn progress_bar(json: bool) -> ProgressBar {
    if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn finish_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(finish_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(finish_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_ok(ok: bool) -> String {
    use console::Style;
    if ok {
        Style::new().green().apply_to("ok").to_string()
    } else {
        Style::new().red().bold().apply_to("failed").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"slug": "witcher3"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"slug\""));
        assert!(result.contains("\"witcher3\""));
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(CliError::from(CoreError::NoRuntime).exit_code(), EXIT_NO_RUNTIME);
        let store = cellar_store::StoreError::Migration {
            path: "/env".to_owned(),
            reason: "disk full".to_owned(),
        };
        assert_eq!(CliError::from(CoreError::from(store)).exit_code(), EXIT_STORE_ERROR);
        // Wording of the message plays no part.
        let lookalike = CliError::from("no compatibility runtime found".to_owned());
        assert_eq!(lookalike.exit_code(), EXIT_FAILURE);
        let config = CliError::from(CoreError::Config("store error: bad".to_owned()));
        assert_eq!(config.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn colorize_ok_keeps_words() {
        assert!(colorize_ok(true).contains("ok"));
        assert!(colorize_ok(false).contains("failed"));
    }

    #[test]
    fn hidden_bar_in_json_mode() {
        assert!(progress_bar(true).is_hidden());
    }

    #[test]
    fn spinner_finishes() {
        let pb = ProgressBar::hidden();
        spin_ok(&pb, "done");
        assert!(pb.is_finished());
    }
}
