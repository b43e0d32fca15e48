use crate::process::{CommandRunner, CommandSpec, ExitOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Scripted `CommandRunner` for tests.
///
/// Every invocation is recorded. The outcome is taken from the most recently
/// added rule whose needle the command mentions, defaulting to exit code 0.
/// A boot (`wineboot`) call materializes a minimal prefix under `WINEPREFIX`
/// so callers see the same directory shape a real runtime leaves behind.
pub struct MockRunner {
    calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<(String, ExitOutcome)>>,
    tools: Mutex<HashMap<String, PathBuf>>,
    delay: Option<Duration>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            tools: Mutex::new(HashMap::new()),
            delay: None,
        }
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run take `delay` before it returns.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report `name` as installed on the host.
    #[must_use]
    pub fn with_tool(self, name: &str) -> Self {
        self.set_tool(name, true);
        self
    }

    #[must_use]
    pub fn on(self, needle: &str, outcome: ExitOutcome) -> Self {
        self.set_outcome(needle, outcome);
        self
    }

    pub fn set_outcome(&self, needle: &str, outcome: ExitOutcome) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((needle.to_owned(), outcome));
    }

    pub fn set_tool(&self, name: &str, present: bool) {
        let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        if present {
            tools.insert(name.to_owned(), PathBuf::from(format!("/usr/bin/{name}")));
        } else {
            tools.remove(name);
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.mentions(needle))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn outcome_for(&self, spec: &CommandSpec) -> ExitOutcome {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(needle, _)| spec.mentions(needle))
            .map_or(ExitOutcome::Exited(0), |(_, outcome)| outcome.clone())
    }
}

fn materialize_prefix(spec: &CommandSpec) -> std::io::Result<()> {
    let Some(prefix) = spec.env.get("WINEPREFIX") else {
        return Ok(());
    };
    let prefix = PathBuf::from(prefix);
    std::fs::create_dir_all(prefix.join("drive_c/windows"))?;
    std::fs::write(prefix.join("system.reg"), "WINE REGISTRY Version 2\n")?;
    Ok(())
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec, _timeout: Duration) -> ExitOutcome {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.outcome_for(spec);
        if outcome.success() && spec.mentions("wineboot") {
            if let Err(e) = materialize_prefix(spec) {
                return ExitOutcome::WaitFailed(e.to_string());
            }
        }
        outcome
    }

    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
