pub(crate) mod builder;
pub(crate) mod handle;
mod os_signals;
mod registry;
mod teardown;

use std::{io, path::PathBuf, time::Duration};

use nix::{sys::signal::Signal, unistd::Pid};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    env::{EnvSource, EnvironmentBridge},
    listener::{self, PortSpecError},
    messaging::{Event, Inbox},
    signals::{signal_name, RELOAD_SIGNAL},
    status::StatusReporter,
    worker::{launcher::Launcher, Generation, WorkerExit},
};
use handle::StarterHandle;
use os_signals::SignalForwarder;
use registry::{Reaped, WorkerRegistry};
use teardown::Teardown;

/// Conditions that stop the supervisor before any worker runs.
#[derive(Debug, thiserror::Error)]
pub enum StarterError {
    #[error("a server command must be specified")]
    MissingCommand,
    #[error("server command '{command}' not found: {source}")]
    CommandNotFound {
        command: String,
        #[source]
        source: which::Error,
    },
    #[error(transparent)]
    PortSpec(#[from] PortSpecError),
    #[error("failed to remove existing socket file {path}: {source}")]
    RemoveSocket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on {spec}: {source}")]
    Bind {
        spec: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
}

/// A configured supervisor, ready to bind its sockets and start the first worker.
///
/// Built with [`StarterBuilder`](crate::StarterBuilder).
pub struct Starter {
    command: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    interval: Duration,
    pid_file: Option<PathBuf>,
    ports: Vec<String>,
    paths: Vec<PathBuf>,
    signal_on_hup: Signal,
    signal_on_term: Signal,
    status_file: Option<PathBuf>,
    env_source: Option<Box<dyn EnvSource>>,
    kill_old_delay: Duration,
    spawn_retry_delay: Duration,
}

impl Starter {
    /// Binds every listener, installs the signal handlers and starts
    /// supervising in a background task.
    ///
    /// Must be called from within a Tokio runtime. Errors here are the only
    /// ones the supervisor ever reports: once this returns `Ok`, workers are
    /// respawned forever until a shutdown signal arrives.
    pub fn run(self) -> Result<StarterHandle, StarterError> {
        let teardown = Teardown::new(self.pid_file.clone(), self.status_file.clone());
        teardown.write_pid_file();

        let listeners = listener::provision(&self.ports, &self.paths)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let signals = SignalForwarder::install(tx.clone()).map_err(StarterError::Signals)?;

        let bridge = EnvironmentBridge::new(&listeners, self.env_source);
        let launcher = Launcher {
            command: self.command,
            args: self.args,
            dir: self.dir,
            interval: self.interval,
            retry_delay: self.spawn_retry_delay,
            listeners,
            bridge,
            generation: Generation::default(),
            events: tx.clone(),
        };

        let coordinator = Coordinator {
            launcher,
            inbox: Inbox::new(rx),
            registry: WorkerRegistry::default(),
            status: self.status_file.map(StatusReporter::spawn),
            signals,
            signal_on_hup: self.signal_on_hup,
            signal_on_term: self.signal_on_term,
            kill_old_delay: self.kill_old_delay,
            teardown,
        };
        let join_handle = tokio::spawn(coordinator.run());
        Ok(StarterHandle::new(join_handle, tx))
    }
}

/// Why the control loop stopped, and what to tell the workers.
#[derive(Debug, Clone, Copy)]
struct ShutdownRequest {
    received: Option<Signal>,
    relay: Signal,
}

/// The restart state machine. Sole owner of the worker registry.
struct Coordinator {
    launcher: Launcher,
    inbox: Inbox,
    registry: WorkerRegistry,
    status: Option<StatusReporter>,
    signals: SignalForwarder,
    signal_on_hup: Signal,
    signal_on_term: Signal,
    kill_old_delay: Duration,
    teardown: Teardown,
}

impl Coordinator {
    async fn run(mut self) {
        let worker = self.launcher.launch(&mut self.inbox).await;
        self.registry.promote(worker);
        self.publish();

        let request = self.supervise().await;
        self.shutdown(request).await;
        self.finish().await;
    }

    /// Handles events until a shutdown signal arrives.
    async fn supervise(&mut self) -> ShutdownRequest {
        loop {
            let Some(event) = self.inbox.next().await else {
                warn!("event stream closed, shutting down");
                return ShutdownRequest {
                    received: None,
                    relay: self.signal_on_term,
                };
            };
            match event {
                Event::Exited(exit) => self.handle_exit(exit).await,
                Event::Signal(sig) if sig == RELOAD_SIGNAL => self.reload().await,
                Event::Signal(sig) => {
                    return ShutdownRequest {
                        received: Some(sig),
                        relay: self.signal_on_term,
                    }
                }
                Event::Snapshot(reply) => {
                    let _ = reply.send(self.registry.snapshot());
                }
            }
        }
    }

    async fn handle_exit(&mut self, exit: WorkerExit) {
        match self.registry.reap(exit.pid) {
            Reaped::Current(generation) => {
                warn!(
                    pid = exit.pid,
                    %generation,
                    outcome = %exit.outcome,
                    "worker died unexpectedly, restarting"
                );
                let worker = self.launcher.launch(&mut self.inbox).await;
                self.registry.promote(worker);
            }
            Reaped::Retiring(generation) => {
                info!(pid = exit.pid, %generation, outcome = %exit.outcome, "old worker died");
            }
            Reaped::Unknown => {
                debug!(pid = exit.pid, outcome = %exit.outcome, "untracked process exited");
                return;
            }
        }
        self.publish();
    }

    /// Swaps in a new current worker, then signals the retiring ones.
    async fn reload(&mut self) {
        info!(
            current = ?self.registry.current().map(|worker| worker.pid),
            old_workers = self.registry.retiring_pids().len(),
            "received HUP, spawning a new worker"
        );
        let worker = self.launcher.launch(&mut self.inbox).await;
        self.registry.promote(worker);
        self.publish();

        let old_workers = self.registry.retiring_pids();
        if old_workers.is_empty() {
            info!(pid = worker.pid, "new worker is now running, no old workers to signal");
            return;
        }
        info!(
            pid = worker.pid,
            generation = %worker.generation,
            signal = signal_name(self.signal_on_hup),
            ?old_workers,
            "new worker is now running, signaling old workers"
        );

        if !self.kill_old_delay.is_zero() {
            info!(secs = self.kill_old_delay.as_secs_f64(), "sleeping before killing old workers");
            tokio::time::sleep(self.kill_old_delay).await;
        }
        info!("killing old workers");
        send_signal(&self.registry.retiring_pids(), self.signal_on_hup);
    }

    /// Relays the shutdown signal to every worker and waits for all of them.
    async fn shutdown(&mut self, request: ShutdownRequest) {
        self.registry.retire_current();
        let workers = self.registry.retiring_pids();
        info!(
            received = request.received.map(signal_name).unwrap_or("none"),
            relay = signal_name(request.relay),
            ?workers,
            "shutting down, signaling all workers"
        );
        send_signal(&workers, request.relay);

        while self.registry.has_retiring() {
            match self.inbox.next().await {
                Some(Event::Exited(exit)) => {
                    if let Reaped::Retiring(generation) = self.registry.reap(exit.pid) {
                        info!(pid = exit.pid, %generation, outcome = %exit.outcome, "worker died");
                        self.publish();
                    }
                }
                Some(Event::Snapshot(reply)) => {
                    let _ = reply.send(self.registry.snapshot());
                }
                Some(Event::Signal(sig)) => {
                    debug!(signal = signal_name(sig), "already shutting down, ignoring signal");
                }
                None => {
                    warn!("event stream closed before all workers exited");
                    break;
                }
            }
        }
        info!("exiting");
    }

    async fn finish(self) {
        if let Some(status) = self.status {
            status.close().await;
        }
        self.signals.stop().await;
        self.teardown.release(self.launcher.into_listeners());
    }

    fn publish(&self) {
        if let Some(status) = &self.status {
            status.publish(self.registry.snapshot());
        }
    }
}

fn send_signal(pids: &[u32], signal: Signal) {
    for pid in pids {
        let Ok(raw) = i32::try_from(*pid) else {
            continue;
        };
        if let Err(err) = nix::sys::signal::kill(Pid::from_raw(raw), signal) {
            warn!(pid, signal = signal_name(signal), error = %err, "failed to signal worker");
        }
    }
}
