use std::{
    future::Future,
    path::Path,
    time::{Duration, Instant},
};

use server_starter::{StarterBuilder, StarterHandle, StatusSnapshot};

/// How long a test is willing to wait for the supervisor to reach a state.
#[allow(unused)]
pub const PATIENCE: Duration = Duration::from_secs(10);

/// A builder running `script` under `/bin/sh`, with a short grace interval.
#[allow(unused)]
pub fn sh_worker(script: &str) -> StarterBuilder {
    StarterBuilder::new("/bin/sh")
        .with_args(["-c", script])
        .with_interval(Duration::from_millis(100))
}

/// A TCP port that was free a moment ago.
#[allow(unused)]
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[allow(unused)]
pub fn is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Polls `check` until it yields a value or [`PATIENCE`] runs out.
#[allow(unused)]
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + PATIENCE;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Waits until the supervisor's registry satisfies `predicate`.
#[allow(unused)]
pub async fn snapshot_where(
    handle: &StarterHandle,
    predicate: impl Fn(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let predicate = &predicate;
    eventually("registry state", || async move {
        let snapshot = handle.snapshot().await.unwrap();
        predicate(&snapshot).then_some(snapshot)
    })
    .await
}

/// Waits until `path` holds a complete line and returns its contents, trimmed.
#[allow(unused)]
pub async fn read_line(path: &Path) -> String {
    eventually("worker output", || async move {
        std::fs::read_to_string(path)
            .ok()
            .filter(|contents| contents.ends_with('\n'))
            .map(|contents| contents.trim().to_string())
    })
    .await
}

/// Sends TERM and waits for the full shutdown sequence.
#[allow(unused)]
pub async fn shutdown(handle: StarterHandle) {
    handle.shutdown().unwrap();
    tokio::time::timeout(PATIENCE, handle.wait())
        .await
        .expect("supervisor did not shut down")
        .unwrap();
}
