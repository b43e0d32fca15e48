//! Compatibility runtime discovery, subprocess execution, and launch specs for Cellar.
//!
//! This crate implements the host-facing layer: `locator` scans known install
//! trees for Proton-style runtimes and ranks them, `process` defines the
//! `CommandRunner` seam every external installer goes through (with a tokio
//! implementation that enforces timeouts and a `MockRunner` for tests), `host`
//! captures the host environment and sanitizes it, and `launch` turns an
//! executable plus an environment into a `LaunchSpec`.

pub mod host;
pub mod launch;
pub mod locator;
pub mod mock;
pub mod prereq;
pub mod process;

pub use host::{merge_dll_overrides, sanitize_env, HostContext};
pub use launch::{
    build_launch_spec, compat_env, runtime_command, runtime_run_args, LaunchRequest, LaunchSpec,
};
pub use locator::{discover_runtimes, find_best_runtime, DiscoverySource, Runtime, SearchRoots};
pub use mock::MockRunner;
pub use prereq::{
    check_host_tools, find_in_path, format_missing, MissingPrereq, GAMEMODE_TOOL, PREREQUISITE_TOOL,
};
pub use process::{CommandRunner, CommandSpec, ExitOutcome, TokioRunner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no runtime launcher found under '{0}'")]
    LauncherNotFound(String),
    #[error("'{prefix}' has no pfx/ subdirectory and runtime '{runtime}' bundles no wine binary to drive it in place")]
    FlatPrefixUnsupported { prefix: String, runtime: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_display_launcher() {
        let e = RuntimeError::LauncherNotFound("/opt/nothing".to_owned());
        assert!(e.to_string().contains("/opt/nothing"));
    }
}
