use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use server_starter::{signal_from_name, Signal, StarterBuilder};
use tracing_subscriber::EnvFilter;

/// Superdaemon for hot-deploying server programs.
///
/// Example: start_server --port=8000 -- plackup -s Starlet --max-workers=100 index.psgi
#[derive(Debug, Parser)]
#[command(name = "start_server", version)]
struct Cli {
    /// TCP port to listen to, "port" or "host:port" (repeatable)
    #[arg(long = "port", value_name = "(port|host:port)")]
    ports: Vec<String>,

    /// Path at which to listen using a unix socket (repeatable)
    #[arg(long = "path", value_name = "path")]
    paths: Vec<PathBuf>,

    /// Working directory the server program is started in
    #[arg(long, value_name = "path")]
    dir: Option<PathBuf>,

    /// Seconds a new server process must stay up to be considered started
    #[arg(long, value_name = "seconds", default_value_t = 1)]
    interval: u64,

    /// Signal sent to old server processes on SIGHUP (default: TERM)
    #[arg(long, value_name = "signal")]
    signal_on_hup: Option<String>,

    /// Signal sent to server processes on SIGTERM (default: TERM)
    #[arg(long, value_name = "signal")]
    signal_on_term: Option<String>,

    /// Writes the pid of start_server to this file
    #[arg(long, value_name = "filename")]
    pid_file: Option<PathBuf>,

    /// Writes the generation:pid of each server process to this file
    #[arg(long, value_name = "filename")]
    status_file: Option<PathBuf>,

    /// envdir-style directory of extra variables for the server (overrides ENVDIR)
    #[arg(long, value_name = "path")]
    envdir: Option<PathBuf>,

    /// Makes the kill-old delay default to 5 seconds (ENABLE_AUTO_RESTART overrides)
    #[arg(long)]
    enable_auto_restart: bool,

    /// Seconds to wait before signaling old workers (KILL_OLD_DELAY overrides)
    #[arg(long, value_name = "seconds")]
    kill_old_delay: Option<u64>,

    /// Seconds to wait between failed attempts to start the server
    #[arg(long, value_name = "seconds", default_value_t = 0)]
    spawn_retry_delay: u64,

    /// Server program and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "server-prog")]
    command: Vec<String>,
}

fn override_signal(option: &str, name: Option<&str>) -> Option<Signal> {
    let name = name?;
    let signal = signal_from_name(name);
    if signal.is_none() {
        tracing::warn!(option, name, "unknown signal name, keeping the default");
    }
    signal
}

fn builder(cli: Cli) -> anyhow::Result<StarterBuilder> {
    let mut command = cli.command.into_iter();
    let program = command.next().context("server program not specified")?;

    let mut builder = StarterBuilder::new(program)
        .with_args(command)
        .with_interval(Duration::from_secs(cli.interval))
        .with_auto_restart(cli.enable_auto_restart)
        .with_spawn_retry_delay(Duration::from_secs(cli.spawn_retry_delay));
    for port in cli.ports {
        builder = builder.with_port(port);
    }
    for path in cli.paths {
        builder = builder.with_path(path);
    }
    if let Some(dir) = cli.dir {
        builder = builder.with_dir(dir);
    }
    if let Some(signal) = override_signal("signal-on-hup", cli.signal_on_hup.as_deref()) {
        builder = builder.with_signal_on_hup(signal);
    }
    if let Some(signal) = override_signal("signal-on-term", cli.signal_on_term.as_deref()) {
        builder = builder.with_signal_on_term(signal);
    }
    if let Some(path) = cli.pid_file {
        builder = builder.with_pid_file(path);
    }
    if let Some(path) = cli.status_file {
        builder = builder.with_status_file(path);
    }
    if let Some(path) = cli.envdir {
        builder = builder.with_envdir(path);
    }
    if let Some(secs) = cli.kill_old_delay {
        builder = builder.with_kill_old_delay(Duration::from_secs(secs));
    }
    Ok(builder)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let handle = builder(cli)?.build()?.run()?;
    handle.wait().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_classic_invocation() {
        let cli = Cli::try_parse_from([
            "start_server",
            "--port=8000",
            "--port=127.0.0.1:9000",
            "--signal-on-hup=USR1",
            "--",
            "plackup",
            "-s",
            "Starlet",
        ])
        .unwrap();
        assert_eq!(cli.ports, vec!["8000", "127.0.0.1:9000"]);
        assert_eq!(cli.interval, 1);
        assert_eq!(cli.signal_on_hup.as_deref(), Some("USR1"));
        assert_eq!(cli.command, vec!["plackup", "-s", "Starlet"]);
    }

    #[test]
    fn missing_program_is_an_error() {
        let cli = Cli::try_parse_from(["start_server", "--port=8000"]).unwrap();
        assert!(builder(cli).is_err());
    }

    #[test]
    fn unknown_signal_names_are_no_override() {
        assert_eq!(override_signal("signal-on-hup", Some("NOPE")), None);
        assert_eq!(
            override_signal("signal-on-term", Some("QUIT")),
            Some(Signal::SIGQUIT)
        );
        assert_eq!(override_signal("signal-on-term", None), None);
    }
}
