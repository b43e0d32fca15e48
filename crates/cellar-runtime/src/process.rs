use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// One external process invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables layered over the inherited host environment.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Whether `needle` appears in the program path or any argument.
    pub fn mentions(&self, needle: &str) -> bool {
        self.program.to_string_lossy().contains(needle) || self.args.iter().any(|a| a.contains(needle))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a process invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled,
    TimedOut,
    SpawnFailed(String),
    WaitFailed(String),
}

impl ExitOutcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Exit code for bookkeeping; anything without one records as `-1`.
    pub fn recorded_code(&self) -> i32 {
        self.code().unwrap_or(-1)
    }

    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit code {code}"),
            ExitOutcome::Signaled => write!(f, "killed by signal"),
            ExitOutcome::TimedOut => write!(f, "timed out"),
            ExitOutcome::SpawnFailed(e) => write!(f, "failed to start: {e}"),
            ExitOutcome::WaitFailed(e) => write!(f, "failed while waiting: {e}"),
        }
    }
}

/// Runs external helper processes and locates host tools.
///
/// Every boot, prerequisite, and installer invocation goes through this trait
/// so provisioning can be exercised without a real runtime.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, killing the process if `timeout` elapses first.
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> ExitOutcome;

    /// Locate a host tool on `PATH`.
    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        crate::prereq::find_in_path(name, None)
    }
}

/// Real process runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> ExitOutcome {
        debug!("running {spec} (timeout {}s)", timeout.as_secs());
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExitOutcome::SpawnFailed(e.to_string()),
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code().map_or(ExitOutcome::Signaled, ExitOutcome::Exited),
            Ok(Err(e)) => ExitOutcome::WaitFailed(e.to_string()),
            Err(_) => {
                warn!("{} timed out after {}s, killing", spec.program.display(), timeout.as_secs());
                kill_process_group(&mut child).await;
                ExitOutcome::TimedOut
            }
        }
    }
}

/// Kill the child together with everything it spawned (wineserver, installers).
///
/// The child leads its own process group, so its pid is the group id.
async fn kill_process_group(child: &mut tokio::process::Child) {
    let group = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok());
    if let Some(pgid) = group {
        // SAFETY: killpg only sends a signal to the group; it touches no memory.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if ret == 0 {
            if let Err(e) = child.wait().await {
                warn!("failed to reap process group {pgid}: {e}");
            }
            return;
        }
        warn!(
            "failed to kill process group {pgid}: {}",
            std::io::Error::last_os_error()
        );
    }
    if let Err(e) = child.kill().await {
        warn!("failed to kill child process: {e}");
    }
}
