use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Fire-and-forget status callback installed on the service.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Reports provisioning steps to the log and to an optional callback.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<ProgressFn>,
}

impl Progress {
    pub fn new(callback: ProgressFn) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn report(&self, message: &str) {
        info!("{message}");
        if let Some(cb) = &self.callback {
            cb(message);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callback_receives_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Progress::new(Arc::new(move |m: &str| sink.lock().unwrap().push(m.to_owned())));
        progress.report("booting prefix");
        progress.report("done");
        assert_eq!(*seen.lock().unwrap(), vec!["booting prefix", "done"]);
    }

    #[test]
    fn default_is_silent() {
        Progress::default().report("nobody listens");
    }
}
