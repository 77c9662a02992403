use nix::sys::signal::Signal;

/// Signal that triggers a graceful restart of the worker.
pub const RELOAD_SIGNAL: Signal = Signal::SIGHUP;

/// Signals the supervisor listens for. Everything but [`RELOAD_SIGNAL`] shuts it down.
pub const HANDLED_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
];

#[cfg(any(target_os = "linux", target_os = "android"))]
const PLATFORM_NAMES: &[(Signal, &str)] = &[
    (Signal::SIGCHLD, "CHLD"),
    (Signal::SIGCONT, "CONT"),
    (Signal::SIGIO, "IO"),
    (Signal::SIGPROF, "PROF"),
    (Signal::SIGPWR, "PWR"),
    (Signal::SIGSTKFLT, "STKFLT"),
    (Signal::SIGSTOP, "STOP"),
    (Signal::SIGSYS, "SYS"),
    (Signal::SIGTSTP, "TSTP"),
    (Signal::SIGTTIN, "TTIN"),
    (Signal::SIGTTOU, "TTOU"),
    (Signal::SIGURG, "URG"),
    (Signal::SIGUSR1, "USR1"),
    (Signal::SIGUSR2, "USR2"),
    (Signal::SIGVTALRM, "VTALRM"),
    (Signal::SIGWINCH, "WINCH"),
    (Signal::SIGXCPU, "XCPU"),
    (Signal::SIGXFSZ, "XFSZ"),
];

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const PLATFORM_NAMES: &[(Signal, &str)] = &[
    (Signal::SIGCHLD, "CHLD"),
    (Signal::SIGCONT, "CONT"),
    (Signal::SIGIO, "IO"),
    (Signal::SIGPROF, "PROF"),
    (Signal::SIGSTOP, "STOP"),
    (Signal::SIGSYS, "SYS"),
    (Signal::SIGTSTP, "TSTP"),
    (Signal::SIGTTIN, "TTIN"),
    (Signal::SIGTTOU, "TTOU"),
    (Signal::SIGURG, "URG"),
    (Signal::SIGUSR1, "USR1"),
    (Signal::SIGUSR2, "USR2"),
    (Signal::SIGVTALRM, "VTALRM"),
    (Signal::SIGWINCH, "WINCH"),
    (Signal::SIGXCPU, "XCPU"),
    (Signal::SIGXFSZ, "XFSZ"),
];

const COMMON_NAMES: &[(Signal, &str)] = &[
    (Signal::SIGABRT, "ABRT"),
    (Signal::SIGALRM, "ALRM"),
    (Signal::SIGBUS, "BUS"),
    (Signal::SIGFPE, "FPE"),
    (Signal::SIGHUP, "HUP"),
    (Signal::SIGILL, "ILL"),
    (Signal::SIGINT, "INT"),
    (Signal::SIGKILL, "KILL"),
    (Signal::SIGPIPE, "PIPE"),
    (Signal::SIGQUIT, "QUIT"),
    (Signal::SIGSEGV, "SEGV"),
    (Signal::SIGTERM, "TERM"),
    (Signal::SIGTRAP, "TRAP"),
];

fn table() -> impl Iterator<Item = &'static (Signal, &'static str)> {
    COMMON_NAMES.iter().chain(PLATFORM_NAMES.iter())
}

/// Returns the short name of `signal` ("TERM", "HUP", ...), or `"UNKNOWN"`.
pub fn signal_name(signal: Signal) -> &'static str {
    table()
        .find(|(sig, _)| *sig == signal)
        .map(|(_, name)| *name)
        .unwrap_or("UNKNOWN")
}

/// Looks a signal up by its short name.
///
/// Names are matched case-insensitively and an optional `SIG` prefix is
/// accepted, so `"TERM"`, `"term"` and `"SIGTERM"` all resolve to `SIGTERM`.
/// Unknown names yield `None`, which callers treat as "no override".
pub fn signal_from_name(name: &str) -> Option<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);
    table()
        .find(|(_, candidate)| *candidate == short)
        .map(|(sig, _)| *sig)
}
