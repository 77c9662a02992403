pub(crate) mod launcher;

use std::{fmt, os::unix::process::ExitStatusExt, process::ExitStatus};

use nix::sys::signal::Signal;

use crate::signals::signal_name;

/// Sequential identifier of one launch attempt.
///
/// Bumped on every attempt, including attempts whose worker never came up,
/// so the generations that actually ran may have gaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker process the supervisor is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: u32,
    pub generation: Generation,
}

/// Status reported when the real one cannot be decoded.
pub const FAILURE_STATUS: i32 = 255;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with this code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
    /// The wait status could not be decoded or waiting failed.
    /// Reported as [`FAILURE_STATUS`].
    Failure,
}

impl ExitOutcome {
    /// Decodes a wait status, falling back to [`ExitOutcome::Failure`].
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        if let Some(signal) = status.signal() {
            return Self::Signaled(signal);
        }
        tracing::error!(
            raw = status.into_raw(),
            "cannot decode worker wait status on this platform, reporting status {FAILURE_STATUS}"
        );
        Self::Failure
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled(raw) => {
                let name = Signal::try_from(*raw).map(signal_name).unwrap_or("UNKNOWN");
                write!(f, "killed by signal {raw} ({name})")
            }
            Self::Failure => write!(f, "status {FAILURE_STATUS}"),
        }
    }
}

/// Reported by an exit watcher once its worker has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub pid: u32,
    pub outcome: ExitOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_count_up_by_one() {
        let mut generation = Generation::default();
        for expected in 1..=5 {
            generation = generation.next();
            assert_eq!(generation.get(), expected);
        }
        assert!(Generation::new(2) > Generation::new(1));
        assert_eq!(Generation::new(9).to_string(), "9");
    }

    #[test]
    fn decodes_exit_codes() {
        let outcome = ExitOutcome::from_status(ExitStatus::from_raw(3 << 8));
        assert_eq!(outcome, ExitOutcome::Exited(3));
        assert!(!outcome.success());
        assert!(ExitOutcome::from_status(ExitStatus::from_raw(0)).success());
    }

    #[test]
    fn decodes_signals() {
        let outcome = ExitOutcome::from_status(ExitStatus::from_raw(libc::SIGTERM));
        assert_eq!(outcome, ExitOutcome::Signaled(libc::SIGTERM));
        assert_eq!(
            outcome.to_string(),
            format!("killed by signal {} (TERM)", libc::SIGTERM)
        );
    }

    #[test]
    fn failure_sentinel_reports_255() {
        assert_eq!(ExitOutcome::Failure.to_string(), "status 255");
        assert!(!ExitOutcome::Failure.success());
    }
}
