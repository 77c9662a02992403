use std::{path::PathBuf, time::Duration};

use nix::sys::signal::Signal;

use crate::{
    env::{EnvDir, EnvSource, ENVDIR_VAR},
    Starter, StarterError,
};

pub const KILL_OLD_DELAY_VAR: &str = "KILL_OLD_DELAY";
pub const ENABLE_AUTO_RESTART_VAR: &str = "ENABLE_AUTO_RESTART";

/// Kill-old delay used when auto-restart is on and no delay is given.
const AUTO_RESTART_KILL_OLD_DELAY: Duration = Duration::from_secs(5);

/// Builds a [`Starter`] with configurable parameters.
///
/// Only the command is mandatory. Defaults: one second grace interval, `TERM`
/// relayed to old workers on `HUP` and to every worker on shutdown, no status
/// or PID file, and immediate respawn after a failed launch.
pub struct StarterBuilder {
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
    envdir: Option<PathBuf>,
    env_source: Option<Box<dyn EnvSource>>,
    kill_old_delay: Option<Duration>,
    auto_restart: bool,
    spawn_retry_delay: Duration,
}

impl StarterBuilder {
    /// Creates a builder for the server program `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            dir: None,
            interval: Duration::from_secs(1),
            pid_file: None,
            ports: Vec::new(),
            paths: Vec::new(),
            signal_on_hup: Signal::SIGTERM,
            signal_on_term: Signal::SIGTERM,
            status_file: None,
            envdir: None,
            env_source: None,
            kill_old_delay: None,
            auto_restart: false,
            spawn_retry_delay: Duration::ZERO,
        }
    }

    /// Appends one argument passed to the server program.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments passed to the server program.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory of every worker.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Grace period a new worker must survive before it counts as started.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    /// Adds a TCP listener, `"port"` or `"host:port"`.
    pub fn with_port(mut self, spec: impl Into<String>) -> Self {
        self.ports.push(spec.into());
        self
    }

    /// Adds a Unix domain socket listener.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Signal sent to old workers once a reload has a new worker running.
    pub fn with_signal_on_hup(mut self, signal: Signal) -> Self {
        self.signal_on_hup = signal;
        self
    }

    /// Signal sent to every worker on shutdown.
    pub fn with_signal_on_term(mut self, signal: Signal) -> Self {
        self.signal_on_term = signal;
        self
    }

    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_file = Some(path.into());
        self
    }

    /// Reads extra worker variables from an `envdir` before every launch.
    /// Without this, the `ENVDIR` environment variable is consulted.
    pub fn with_envdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.envdir = Some(path.into());
        self
    }

    /// Uses a custom source of extra worker variables. Takes precedence over any envdir.
    pub fn with_env_source(mut self, source: impl EnvSource) -> Self {
        self.env_source = Some(Box::new(source));
        self
    }

    /// Delay between a reload's new worker coming up and the old ones being signaled.
    /// `KILL_OLD_DELAY` in the environment overrides it.
    pub fn with_kill_old_delay(mut self, delay: Duration) -> Self {
        self.kill_old_delay = Some(delay);
        self
    }

    /// Only affects the default kill-old delay.
    /// `ENABLE_AUTO_RESTART` in the environment overrides it.
    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    /// Pause between failed launch attempts. Zero retries immediately.
    pub fn with_spawn_retry_delay(mut self, delay: Duration) -> Self {
        self.spawn_retry_delay = delay;
        self
    }

    /// Validates the command and resolves environment overrides.
    pub fn build(self) -> Result<Starter, StarterError> {
        if self.command.is_empty() {
            return Err(StarterError::MissingCommand);
        }
        which::which(&self.command).map_err(|source| StarterError::CommandNotFound {
            command: self.command.clone(),
            source,
        })?;

        let lookup = |key: &str| std::env::var(key).ok();
        let kill_old_delay = resolve_kill_old_delay(self.kill_old_delay, self.auto_restart, lookup);
        let env_source = self.env_source.or_else(|| {
            self.envdir
                .or_else(|| lookup(ENVDIR_VAR).filter(|dir| !dir.is_empty()).map(PathBuf::from))
                .map(|dir| Box::new(EnvDir::new(dir)) as Box<dyn EnvSource>)
        });

        Ok(Starter {
            command: self.command,
            args: self.args,
            dir: self.dir,
            interval: self.interval,
            pid_file: self.pid_file,
            ports: self.ports,
            paths: self.paths,
            signal_on_hup: self.signal_on_hup,
            signal_on_term: self.signal_on_term,
            status_file: self.status_file,
            env_source,
            kill_old_delay,
            spawn_retry_delay: self.spawn_retry_delay,
        })
    }
}

/// Environment first, then the explicit value, then 5s if auto-restart is
/// on, else zero. Unparsable environment values are ignored.
pub(crate) fn resolve_kill_old_delay(
    explicit: Option<Duration>,
    auto_restart: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> Duration {
    let delay = lookup(KILL_OLD_DELAY_VAR)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .or(explicit);
    let auto_restart = lookup(ENABLE_AUTO_RESTART_VAR)
        .and_then(|value| parse_bool(value.trim()))
        .unwrap_or(auto_restart);

    match delay {
        Some(delay) => delay,
        None if auto_restart => AUTO_RESTART_KILL_OLD_DELAY,
        None => Duration::ZERO,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
