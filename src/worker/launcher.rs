use std::{
    io,
    ops::Range,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    path::PathBuf,
    time::Duration,
};

use tokio::{
    process::{Child, Command},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

use crate::{
    env::{EnvUpdate, EnvironmentBridge, FIRST_INHERITED_FD},
    listener::ListenerSpec,
    messaging::{Event, Inbox},
    signals::{signal_name, RELOAD_SIGNAL},
    worker::{ExitOutcome, Generation, WorkerExit, WorkerRecord},
};

/// Spawns worker generations that inherit the supervisor's listeners.
pub(crate) struct Launcher {
    pub(crate) command: String,
    pub(crate) args: Vec<String>,
    pub(crate) dir: Option<PathBuf>,
    pub(crate) interval: Duration,
    pub(crate) retry_delay: Duration,
    pub(crate) listeners: Vec<ListenerSpec>,
    pub(crate) bridge: EnvironmentBridge,
    pub(crate) generation: Generation,
    pub(crate) events: mpsc::UnboundedSender<Event>,
}

enum Attempt {
    Running(WorkerRecord),
    Failed,
}

impl Launcher {
    /// Launches workers until one is confirmed alive.
    ///
    /// Never gives up. Every event that shows up while a new worker is in its
    /// grace period is deferred on `inbox` for the coordinator.
    pub(crate) async fn launch(&mut self, inbox: &mut Inbox) -> WorkerRecord {
        loop {
            if let Attempt::Running(worker) = self.attempt(inbox).await {
                return worker;
            }
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    async fn attempt(&mut self, inbox: &mut Inbox) -> Attempt {
        self.generation = self.generation.next();
        let generation = self.generation;
        let vars = self.bridge.prepare(generation).await;

        let mut child = match self.spawn(&vars) {
            Ok(child) => child,
            Err(err) => {
                error!(command = %self.command, %generation, error = %err, "failed to exec worker");
                return Attempt::Failed;
            }
        };
        let Some(pid) = child.id() else {
            warn!(%generation, "new worker exited before its pid could be read");
            let _ = child.wait().await;
            return Attempt::Failed;
        };
        info!(pid, %generation, "starting new worker");

        let interrupted = self.grace_period(inbox).await;
        if interrupted {
            debug!(pid, %generation, "grace period cut short, accepting worker without confirmation");
            self.watch(child, pid);
            return Attempt::Running(WorkerRecord { pid, generation });
        }

        match child.try_wait() {
            Ok(None) => {
                self.watch(child, pid);
                Attempt::Running(WorkerRecord { pid, generation })
            }
            Ok(Some(status)) => {
                warn!(
                    pid,
                    %generation,
                    outcome = %ExitOutcome::from_status(status),
                    "new worker seems to have failed to start"
                );
                Attempt::Failed
            }
            Err(err) => {
                warn!(pid, %generation, error = %err, "new worker could not be confirmed, killing it");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Attempt::Failed
            }
        }
    }

    /// Waits out the grace period, parking every event seen on `inbox`.
    ///
    /// Returns `true` when a signal other than the reload signal cut it short.
    async fn grace_period(&self, inbox: &mut Inbox) -> bool {
        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return false,
                event = inbox.recv_fresh() => {
                    let Some(event) = event else {
                        (&mut timer).await;
                        return false;
                    };
                    let interrupts = match &event {
                        Event::Signal(sig) => {
                            debug!(signal = signal_name(*sig), "signal received while starting worker");
                            *sig != RELOAD_SIGNAL
                        }
                        _ => false,
                    };
                    inbox.defer(event);
                    if interrupts {
                        return true;
                    }
                }
            }
        }
    }

    fn spawn(&self, vars: &[EnvUpdate]) -> io::Result<Child> {
        // Parent-side copies parked above the target range so that placing
        // them at 3.. in the child cannot clobber one another.
        let inherited = self.duplicate_listeners()?;
        // Holds every free slot in the target range until the spawn returns,
        // so the exec-error pipe opened by the spawn lands above it.
        let _reserved = match inherited.first() {
            Some(source) => reserve_fds(target_range(inherited.len()), source.as_fd())?,
            None => Vec::new(),
        };
        let mapping: Vec<(RawFd, RawFd)> = inherited
            .iter()
            .map(AsRawFd::as_raw_fd)
            .zip(FIRST_INHERITED_FD..)
            .collect();

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in vars {
            match value {
                Some(value) => cmd.env(key, value),
                None => cmd.env_remove(key),
            };
        }
        // SAFETY: dup2 is async-signal-safe and the closure does not allocate.
        unsafe {
            cmd.pre_exec(move || {
                for (source, target) in &mapping {
                    if libc::dup2(*source, *target) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let child = cmd.spawn();
        drop(inherited);
        child
    }

    fn duplicate_listeners(&self) -> io::Result<Vec<OwnedFd>> {
        let floor = target_range(self.listeners.len()).end;
        self.listeners
            .iter()
            .map(|listener| {
                let fd = listener.as_fd().as_raw_fd();
                // SAFETY: fd is a live descriptor borrowed from the listener.
                let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
                if dup < 0 {
                    return Err(io::Error::last_os_error());
                }
                // SAFETY: fcntl just returned a fresh descriptor we now own.
                Ok(unsafe { OwnedFd::from_raw_fd(dup) })
            })
            .collect()
    }

    /// Reports the worker's exit to the coordinator once it is reaped.
    fn watch(&self, mut child: Child, pid: u32) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from_status(status),
                Err(err) => {
                    error!(pid, error = %err, "failed to wait for worker");
                    ExitOutcome::Failure
                }
            };
            let _ = events.send(Event::Exited(WorkerExit { pid, outcome }));
        });
    }

    pub(crate) fn into_listeners(self) -> Vec<ListenerSpec> {
        self.listeners
    }
}

/// Descriptor numbers the worker receives its listeners on.
fn target_range(count: usize) -> Range<RawFd> {
    FIRST_INHERITED_FD..FIRST_INHERITED_FD + count as RawFd
}

/// Fills every closed descriptor in `range` with a close-on-exec copy of
/// `source`. Slots already open are left as they are.
///
/// A descriptor closed by another thread while the copies are held can still
/// open a gap; the liveness check catches a worker that never ran.
fn reserve_fds(range: Range<RawFd>, source: BorrowedFd<'_>) -> io::Result<Vec<OwnedFd>> {
    let mut reserved = Vec::new();
    for slot in range {
        // SAFETY: F_GETFD only inspects the descriptor table.
        if unsafe { libc::fcntl(slot, libc::F_GETFD) } >= 0 {
            continue;
        }
        // SAFETY: source is a live borrowed descriptor.
        let dup = unsafe { libc::fcntl(source.as_raw_fd(), libc::F_DUPFD_CLOEXEC, slot) };
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fcntl just returned a fresh descriptor we now own.
        reserved.push(unsafe { OwnedFd::from_raw_fd(dup) });
    }
    Ok(reserved)
}
