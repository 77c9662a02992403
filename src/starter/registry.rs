use std::collections::BTreeMap;

use crate::{
    status::StatusSnapshot,
    worker::{Generation, WorkerRecord},
};

/// What a reaped pid turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reaped {
    Current(Generation),
    Retiring(Generation),
    Unknown,
}

/// The current worker plus every retiring worker, keyed by pid.
///
/// Owned by the coordinator task and never shared.
#[derive(Debug, Default)]
pub(crate) struct WorkerRegistry {
    current: Option<WorkerRecord>,
    retiring: BTreeMap<u32, Generation>,
}

impl WorkerRegistry {
    pub(crate) fn current(&self) -> Option<WorkerRecord> {
        self.current
    }

    pub(crate) fn retiring_pids(&self) -> Vec<u32> {
        self.retiring.keys().copied().collect()
    }

    pub(crate) fn has_retiring(&self) -> bool {
        !self.retiring.is_empty()
    }

    /// Makes `worker` current. The previous current worker, if any, retires.
    pub(crate) fn promote(&mut self, worker: WorkerRecord) -> Option<WorkerRecord> {
        let previous = self.current.replace(worker);
        if let Some(previous) = previous {
            self.retiring.insert(previous.pid, previous.generation);
        }
        previous
    }

    /// Moves the current worker, if any, into the retiring set.
    pub(crate) fn retire_current(&mut self) {
        if let Some(current) = self.current.take() {
            self.retiring.insert(current.pid, current.generation);
        }
    }

    /// Forgets `pid`, whichever role it had.
    pub(crate) fn reap(&mut self, pid: u32) -> Reaped {
        if let Some(current) = self.current {
            if current.pid == pid {
                self.current = None;
                return Reaped::Current(current.generation);
            }
        }
        match self.retiring.remove(&pid) {
            Some(generation) => Reaped::Retiring(generation),
            None => Reaped::Unknown,
        }
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::default();
        for (pid, generation) in &self.retiring {
            snapshot.insert(*generation, *pid);
        }
        if let Some(current) = self.current {
            snapshot.insert(current.generation, current.pid);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(pid: u32, generation: u64) -> WorkerRecord {
        WorkerRecord {
            pid,
            generation: Generation::new(generation),
        }
    }

    #[test]
    fn reload_leaves_one_current_and_one_retiring() {
        let mut registry = WorkerRegistry::default();
        assert_eq!(registry.promote(worker(100, 1)), None);
        assert!(!registry.has_retiring());

        assert_eq!(registry.promote(worker(200, 2)), Some(worker(100, 1)));
        assert_eq!(registry.current(), Some(worker(200, 2)));
        assert_eq!(registry.retiring_pids(), vec![100]);

        assert_eq!(registry.reap(100), Reaped::Retiring(Generation::new(1)));
        assert!(!registry.has_retiring());
        assert_eq!(registry.current(), Some(worker(200, 2)));
    }

    #[test]
    fn overlapping_reloads_stack_up_retiring_workers() {
        let mut registry = WorkerRegistry::default();
        registry.promote(worker(100, 1));
        registry.promote(worker(200, 2));
        registry.promote(worker(300, 3));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.to_string(), "1:100\n2:200\n3:300\n");
        assert_eq!(registry.retiring_pids(), vec![100, 200]);
    }

    #[test]
    fn current_worker_death_clears_the_slot() {
        let mut registry = WorkerRegistry::default();
        registry.promote(worker(100, 1));
        assert_eq!(registry.reap(100), Reaped::Current(Generation::new(1)));
        assert_eq!(registry.current(), None);
        assert_eq!(registry.reap(100), Reaped::Unknown);

        registry.promote(worker(101, 2));
        assert_eq!(registry.current(), Some(worker(101, 2)));
        assert!(!registry.has_retiring());
    }

    #[test]
    fn shutdown_retires_everything() {
        let mut registry = WorkerRegistry::default();
        registry.promote(worker(100, 1));
        registry.promote(worker(200, 2));
        registry.retire_current();

        assert_eq!(registry.current(), None);
        assert_eq!(registry.retiring_pids(), vec![100, 200]);
        registry.reap(200);
        registry.reap(100);
        assert!(!registry.has_retiring());
        assert!(registry.snapshot().is_empty());
    }
}
