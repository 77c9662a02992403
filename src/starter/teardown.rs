use std::{fs, io, path::PathBuf};

use tracing::{debug, warn};

use crate::listener::ListenerSpec;

/// Cleans up the supervisor's on-disk footprint when dropped.
///
/// Held from before the PID file is written until the shutdown sequence is
/// over, so the files go away on every exit path.
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    pid_file: Option<PathBuf>,
    status_file: Option<PathBuf>,
}

impl Teardown {
    pub(crate) fn new(pid_file: Option<PathBuf>, status_file: Option<PathBuf>) -> Self {
        Self {
            pid_file,
            status_file,
        }
    }

    /// Writes our own pid to the PID file, if one is configured.
    pub(crate) fn write_pid_file(&self) {
        let Some(path) = &self.pid_file else {
            return;
        };
        if let Err(err) = fs::write(path, format!("{}\n", std::process::id())) {
            warn!(path = %path.display(), error = %err, "failed to write pid file");
        }
    }

    /// Closes the listeners, then removes the files.
    pub(crate) fn release(self, listeners: Vec<ListenerSpec>) {
        for listener in listeners {
            debug!(spec = listener.spec(), "closing listener");
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for path in [self.pid_file.take(), self.status_file.take()]
            .into_iter()
            .flatten()
        {
            match fs::remove_file(&path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), error = %err, "failed to remove file");
                }
                _ => {}
            }
        }
    }
}
