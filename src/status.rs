//! Status file reporting.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::worker::Generation;

/// Generation → pid for every worker the supervisor is tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    workers: BTreeMap<Generation, u32>,
}

impl StatusSnapshot {
    pub(crate) fn insert(&mut self, generation: Generation, pid: u32) {
        self.workers.insert(generation, pid);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn pid(&self, generation: Generation) -> Option<u32> {
        self.workers.get(&generation).copied()
    }

    pub fn generations(&self) -> Vec<Generation> {
        self.workers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Generation, u32)> + '_ {
        self.workers.iter().map(|(gen, pid)| (*gen, *pid))
    }
}

/// Renders the status file body: one `generation:pid` line per worker.
impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (generation, pid) in &self.workers {
            writeln!(f, "{generation}:{pid}")?;
        }
        Ok(())
    }
}

/// Background writer that mirrors every published snapshot into the status file.
///
/// Writes are best effort. The coordinator never waits for them.
pub(crate) struct StatusReporter {
    tx: mpsc::UnboundedSender<StatusSnapshot>,
    writer: JoinHandle<()>,
}

impl StatusReporter {
    pub(crate) fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StatusSnapshot>();
        let writer = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                if let Err(err) = tokio::fs::write(&path, snapshot.to_string()).await {
                    debug!(path = %path.display(), error = %err, "failed to write status file");
                }
            }
        });
        Self { tx, writer }
    }

    pub(crate) fn publish(&self, snapshot: StatusSnapshot) {
        let _ = self.tx.send(snapshot);
    }

    /// Flushes pending writes and stops the writer.
    pub(crate) async fn close(self) {
        drop(self.tx);
        let _ = self.writer.await;
    }
}
