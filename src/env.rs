//! Environment handshake between the supervisor and its workers.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::warn;

use crate::{listener::ListenerSpec, worker::Generation};

pub const GENERATION_VAR: &str = "SERVER_STARTER_GENERATION";
pub const PORT_VAR: &str = "SERVER_STARTER_PORT";
pub const ENVDIR_VAR: &str = "ENVDIR";

/// First descriptor number handed to workers; 0-2 are stdio.
pub const FIRST_INHERITED_FD: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum EnvDirError {
    #[error("environment directory {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read environment directory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A variable update: `Some(value)` sets it, `None` unsets it.
pub type EnvUpdate = (String, Option<String>);

/// Supplies extra variables merged into the worker environment before each launch.
#[async_trait]
pub trait EnvSource: Send + Sync + 'static {
    async fn load(&self) -> Result<Vec<EnvUpdate>, EnvDirError>;
}

/// A daemontools-style `envdir`: one file per variable.
#[derive(Debug, Clone)]
pub struct EnvDir {
    path: PathBuf,
}

impl EnvDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EnvSource for EnvDir {
    async fn load(&self) -> Result<Vec<EnvUpdate>, EnvDirError> {
        let read_err = |source: io::Error| EnvDirError::Read {
            path: self.path.clone(),
            source,
        };
        let mut entries = match tokio::fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EnvDirError::Missing(self.path.clone()))
            }
            Err(err) => return Err(read_err(err)),
        };

        let mut updates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || name.contains('=') {
                continue;
            }
            if !entry.file_type().await.map_err(read_err)?.is_file() {
                continue;
            }
            let contents = tokio::fs::read(entry.path()).await.map_err(read_err)?;
            updates.push((name, envdir_value(&contents)));
        }
        updates.sort();
        Ok(updates)
    }
}

/// First line, trailing whitespace trimmed, NULs turned into newlines.
/// An empty file means "unset".
fn envdir_value(contents: &[u8]) -> Option<String> {
    if contents.is_empty() {
        return None;
    }
    let line = contents.split(|b| *b == b'\n').next().unwrap_or_default();
    let text = String::from_utf8_lossy(line).replace('\0', "\n");
    Some(text.trim_end().to_string())
}

/// Renders `spec=fd` pairs, descriptors counted up from 3 in listener order.
pub(crate) fn port_mapping(listeners: &[ListenerSpec]) -> String {
    port_mapping_from_specs(listeners.iter().map(ListenerSpec::spec))
}

fn port_mapping_from_specs<'a>(specs: impl Iterator<Item = &'a str>) -> String {
    specs
        .zip(FIRST_INHERITED_FD..)
        .map(|(spec, fd)| format!("{spec}={fd}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Computes the variables every worker generation starts with.
///
/// Variables loaded from the env source accumulate across launches, the same
/// way they would if they were set on the supervisor's own environment.
pub(crate) struct EnvironmentBridge {
    ports: String,
    source: Option<Box<dyn EnvSource>>,
    extra: BTreeMap<String, Option<String>>,
}

impl EnvironmentBridge {
    pub(crate) fn new(listeners: &[ListenerSpec], source: Option<Box<dyn EnvSource>>) -> Self {
        Self {
            ports: port_mapping(listeners),
            source,
            extra: BTreeMap::new(),
        }
    }

    /// Refreshes the env source and returns the full overlay for `generation`.
    pub(crate) async fn prepare(&mut self, generation: Generation) -> Vec<EnvUpdate> {
        if let Some(source) = &self.source {
            match source.load().await {
                Ok(updates) => self.extra.extend(updates),
                Err(EnvDirError::Missing(_)) => {}
                Err(err) => warn!(error = %err, "failed to load from envdir"),
            }
        }

        let mut vars: Vec<EnvUpdate> = self
            .extra
            .iter()
            .filter(|(key, _)| key.as_str() != GENERATION_VAR && key.as_str() != PORT_VAR)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        vars.push((GENERATION_VAR.to_string(), Some(generation.to_string())));
        vars.push((PORT_VAR.to_string(), Some(self.ports.clone())));
        vars
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn descriptors_start_at_three() {
        let mapping = port_mapping_from_specs(["8000", "127.0.0.1:9000", "/tmp/app.sock"].into_iter());
        assert_eq!(mapping, "8000=3;127.0.0.1:9000=4;/tmp/app.sock=5");
    }

    #[test]
    fn single_port_mapping() {
        assert_eq!(port_mapping_from_specs(["8000"].into_iter()), "8000=3");
        assert_eq!(port_mapping_from_specs(std::iter::empty()), "");
    }

    #[test]
    fn envdir_values() {
        assert_eq!(envdir_value(b""), None);
        assert_eq!(envdir_value(b"bar\n"), Some("bar".to_string()));
        assert_eq!(envdir_value(b"first  \nsecond"), Some("first".to_string()));
        assert_eq!(envdir_value(b"a\0b"), Some("a\nb".to_string()));
        assert_eq!(envdir_value(b"\n"), Some(String::new()));
    }

    #[tokio::test]
    async fn reads_an_envdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DATABASE_URL"), "postgres://db\n").unwrap();
        std::fs::write(dir.path().join("UNSET_ME"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let updates = EnvDir::new(dir.path()).load().await.unwrap();
        assert_eq!(
            updates,
            vec![
                ("DATABASE_URL".to_string(), Some("postgres://db".to_string())),
                ("UNSET_ME".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn missing_envdir_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = EnvDir::new(dir.path().join("absent")).load().await.unwrap_err();
        assert!(matches!(err, EnvDirError::Missing(_)));
    }

    struct Flaky {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EnvSource for Flaky {
        async fn load(&self) -> Result<Vec<EnvUpdate>, EnvDirError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(vec![("MODE".to_string(), Some("blue".to_string()))]),
                _ => Err(EnvDirError::Read {
                    path: PathBuf::from("/envdir"),
                    source: io::Error::other("boom"),
                }),
            }
        }
    }

    #[tokio::test]
    async fn bridge_keeps_previous_values_when_the_source_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut bridge = EnvironmentBridge::new(
            &[],
            Some(Box::new(Flaky {
                calls: calls.clone(),
            })),
        );

        let first = bridge.prepare(Generation::new(1)).await;
        assert!(first.contains(&("MODE".to_string(), Some("blue".to_string()))));
        assert!(first.contains(&(GENERATION_VAR.to_string(), Some("1".to_string()))));

        let second = bridge.prepare(Generation::new(2)).await;
        assert!(second.contains(&("MODE".to_string(), Some("blue".to_string()))));
        assert!(second.contains(&(GENERATION_VAR.to_string(), Some("2".to_string()))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bridge_without_source_only_sets_handshake_vars() {
        let mut bridge = EnvironmentBridge::new(&[], None);
        let vars = bridge.prepare(Generation::new(7)).await;
        assert_eq!(
            vars,
            vec![
                (GENERATION_VAR.to_string(), Some("7".to_string())),
                (PORT_VAR.to_string(), Some(String::new())),
            ]
        );
    }
}
