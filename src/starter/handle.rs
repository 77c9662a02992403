use nix::sys::signal::Signal;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    messaging::Event,
    signals::{signal_name, HANDLED_SIGNALS, RELOAD_SIGNAL},
    status::StatusSnapshot,
};

#[derive(Debug, thiserror::Error)]
pub enum StarterHandleError {
    #[error("the supervisor is no longer running")]
    NotRunning,
    #[error("the supervisor does not handle SIG{}", signal_name(*.0))]
    UnhandledSignal(Signal),
    #[error("the supervisor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Controls a running [`Starter`](crate::Starter).
///
/// Signals sent through the handle go through the same event stream as the
/// ones the process receives from the OS.
#[derive(Debug)]
pub struct StarterHandle {
    join_handle: JoinHandle<()>,
    tx: mpsc::UnboundedSender<Event>,
}

impl StarterHandle {
    pub(crate) fn new(join_handle: JoinHandle<()>, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { join_handle, tx }
    }

    /// Delivers `signal` to the supervisor as if the OS had.
    ///
    /// Only HUP, INT, TERM and QUIT are accepted; anything else is rejected
    /// without reaching the supervisor.
    pub fn signal(&self, signal: Signal) -> Result<(), StarterHandleError> {
        if !HANDLED_SIGNALS.contains(&signal) {
            return Err(StarterHandleError::UnhandledSignal(signal));
        }
        self.tx
            .send(Event::Signal(signal))
            .map_err(|_| StarterHandleError::NotRunning)
    }

    /// Starts a graceful restart.
    pub fn reload(&self) -> Result<(), StarterHandleError> {
        self.signal(RELOAD_SIGNAL)
    }

    /// Starts the shutdown sequence.
    pub fn shutdown(&self) -> Result<(), StarterHandleError> {
        self.signal(Signal::SIGTERM)
    }

    /// Current and retiring workers, as the coordinator sees them.
    ///
    /// Answered between state transitions, so this waits out any launch or
    /// kill-old delay in progress.
    pub async fn snapshot(&self) -> Result<StatusSnapshot, StarterHandleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Event::Snapshot(reply_tx))
            .map_err(|_| StarterHandleError::NotRunning)?;
        reply_rx.await.map_err(|_| StarterHandleError::NotRunning)
    }

    /// Waits until every worker has exited and teardown is done.
    pub async fn wait(self) -> Result<(), StarterHandleError> {
        self.join_handle.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}
