//! # server-starter
//!
//! `server-starter` is a superdaemon for hot-deploying server programs.
//! It binds the listening sockets once, then runs your server as a child
//! process that inherits them by file descriptor. On `SIGHUP` it starts a new
//! generation of the server, and once that one is up it tells the old one to
//! go away. Connections keep queueing on the same sockets the whole time.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use server_starter::StarterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = StarterBuilder::new("plackup")
//!         .with_args(["-s", "Starlet", "app.psgi"])
//!         .with_port("8000")
//!         .with_interval(Duration::from_secs(1))
//!         .with_status_file("/tmp/app.status")
//!         .build()?
//!         .run()?;
//!
//!     handle.wait().await?; // until SIGTERM, SIGINT or SIGQUIT
//!     Ok(())
//! }
//! ```
//!
//! ## What the worker sees
//!
//! | Variable                    | Value                                       |
//! | --------------------------- | ------------------------------------------- |
//! | `SERVER_STARTER_GENERATION` | launch attempt number, starting at 1        |
//! | `SERVER_STARTER_PORT`       | `spec=fd` pairs joined by `;`, fds from 3   |
//!
//! ## Signals
//!
//! | Signal               | Effect                                                     |
//! | -------------------- | ---------------------------------------------------------- |
//! | `HUP`                | start a new worker, then signal the old ones               |
//! | `TERM`, `INT`, `QUIT`| relay the terminate signal to every worker, wait, exit     |
//!
//! Unix only.

#[cfg(not(unix))]
compile_error!("server-starter requires a Unix platform");

pub use env::{EnvDir, EnvDirError, EnvSource, EnvUpdate, GENERATION_VAR, PORT_VAR};
pub use listener::{PortSpec, PortSpecError};
pub use signals::{signal_from_name, signal_name, RELOAD_SIGNAL};
pub use starter::{
    builder::StarterBuilder,
    handle::{StarterHandle, StarterHandleError},
    Starter, StarterError,
};
pub use status::StatusSnapshot;
pub use worker::{ExitOutcome, Generation, WorkerExit, WorkerRecord, FAILURE_STATUS};

/// Re-exported so callers can name signals without depending on `nix`.
pub use nix::sys::signal::Signal;

mod env;
mod listener;
mod messaging;
mod signals;
mod starter;
mod status;
mod worker;
