//! Listener provisioning.
//!
//! Every socket the workers will serve on is bound here, once, before the
//! first worker is spawned. The supervisor keeps them open for its whole run
//! and hands each worker generation a duplicate of every descriptor.

use std::{
    fmt, fs, io,
    net::TcpListener,
    num::ParseIntError,
    os::{
        fd::{AsFd, BorrowedFd},
        unix::{fs::FileTypeExt, net::UnixListener},
    },
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::StarterError;

/// A port specification could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid port spec '{spec}': {source}")]
pub struct PortSpecError {
    pub spec: String,
    #[source]
    pub source: ParseIntError,
}

/// A parsed `"port"` or `"host:port"` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub host: String,
    pub port: u16,
}

impl PortSpec {
    /// Parses `"8000"` or `"127.0.0.1:8000"`.
    ///
    /// The host is everything before the last `:`, so bracketed IPv6
    /// literals such as `"[::1]:8000"` work too.
    pub fn parse(spec: &str) -> Result<Self, PortSpecError> {
        let (host, port) = match spec.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => ("", spec),
        };
        let port = port.parse::<u16>().map_err(|source| PortSpecError {
            spec: spec.to_string(),
            source,
        })?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Address handed to `bind`. An empty host means every IPv4 interface.
    pub fn bind_address(&self) -> String {
        if self.host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "{}", self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug)]
enum Socket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// One bound listening socket and the spec it is advertised under.
#[derive(Debug)]
pub(crate) struct ListenerSpec {
    spec: String,
    socket: Socket,
}

impl ListenerSpec {
    fn bind_tcp(port: &PortSpec) -> Result<Self, StarterError> {
        let spec = port.to_string();
        let address = port.bind_address();
        let socket = TcpListener::bind(&address).map_err(|source| StarterError::Bind {
            spec: spec.clone(),
            source,
        })?;
        info!(spec = %spec, address = %address, "listening on tcp socket");
        Ok(Self {
            spec,
            socket: Socket::Tcp(socket),
        })
    }

    fn bind_unix(path: &Path) -> Result<Self, StarterError> {
        let spec = path.display().to_string();
        remove_stale_socket(path)?;
        let socket = UnixListener::bind(path).map_err(|source| StarterError::Bind {
            spec: spec.clone(),
            source,
        })?;
        info!(path = %spec, "listening on unix socket");
        Ok(Self {
            spec,
            socket: Socket::Unix(socket),
        })
    }

    /// The spec advertised to workers in `SERVER_STARTER_PORT`.
    pub(crate) fn spec(&self) -> &str {
        &self.spec
    }
}

impl AsFd for ListenerSpec {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.socket {
            Socket::Tcp(socket) => socket.as_fd(),
            Socket::Unix(socket) => socket.as_fd(),
        }
    }
}

/// Removes whatever is left at `path` from a previous run.
///
/// A leftover socket that cannot be removed is fatal. Anything else at the
/// path is removed on a best-effort basis and the bind reports what remains.
fn remove_stale_socket(path: &Path) -> Result<(), StarterError> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_socket() {
            info!(path = %path.display(), "removing existing socket file");
            fs::remove_file(path).map_err(|source| StarterError::RemoveSocket {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(());
        }
    }
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            debug!(path = %path.display(), error = %err, "could not clear socket path");
        }
        Ok(()) => debug!(path = %path.display(), "removed leftover file at socket path"),
        Err(_) => {}
    }
    Ok(())
}

/// Binds every port, then every path, in the order given.
///
/// The first failure aborts provisioning. Listeners bound so far are returned
/// to nobody and close when dropped.
pub(crate) fn provision(ports: &[String], paths: &[PathBuf]) -> Result<Vec<ListenerSpec>, StarterError> {
    let mut listeners = Vec::with_capacity(ports.len() + paths.len());
    for raw in ports {
        let port = PortSpec::parse(raw)?;
        listeners.push(ListenerSpec::bind_tcp(&port)?);
    }
    for path in paths {
        listeners.push(ListenerSpec::bind_unix(path)?);
    }
    Ok(listeners)
}
