mod common;

use std::{
    net::TcpListener,
    sync::atomic::{AtomicU32, Ordering},
};

use server_starter::{
    EnvDirError, EnvSource, EnvUpdate, Generation, StarterBuilder, StarterError,
};

use common::{eventually, read_line, sh_worker, shutdown, snapshot_where};

#[tokio::test]
async fn test_bind_failure_is_fatal_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("start_server.pid");
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let result = sh_worker("exec sleep 30")
        .with_port(format!("127.0.0.1:{port}"))
        .with_pid_file(&pid_file)
        .build()
        .unwrap()
        .run();

    assert!(matches!(result, Err(StarterError::Bind { .. })));
    assert!(!pid_file.exists());
}

#[tokio::test]
async fn test_bad_port_spec_is_fatal() {
    let result = sh_worker("exec sleep 30")
        .with_port("localhost:http")
        .build()
        .unwrap()
        .run();
    assert!(matches!(result, Err(StarterError::PortSpec(_))));
}

#[test]
fn test_unknown_command_is_rejected_up_front() {
    let result = StarterBuilder::new("no-such-server-program-anywhere").build();
    assert!(matches!(result, Err(StarterError::CommandNotFound { .. })));

    let result = StarterBuilder::new("").build();
    assert!(matches!(result, Err(StarterError::MissingCommand)));
}

#[tokio::test]
async fn test_pid_and_status_files_live_as_long_as_the_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("start_server.pid");
    let status_file = dir.path().join("start_server.status");

    let handle = sh_worker("exec sleep 30")
        .with_pid_file(&pid_file)
        .with_status_file(&status_file)
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(read_line(&pid_file).await, std::process::id().to_string());

    let snapshot = snapshot_where(&handle, |s| s.len() == 1).await;
    let pid = snapshot.pid(Generation::new(1)).unwrap();
    assert_eq!(read_line(&status_file).await, format!("1:{pid}"));

    shutdown(handle).await;
    assert!(!pid_file.exists());
    assert!(!status_file.exists());
}

#[tokio::test]
async fn test_status_file_follows_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let status_file = dir.path().join("status");

    let handle = sh_worker("exec sleep 30")
        .with_status_file(&status_file)
        .build()
        .unwrap()
        .run()
        .unwrap();

    snapshot_where(&handle, |s| s.len() == 1).await;
    handle.reload().unwrap();
    let snapshot = snapshot_where(&handle, |s| s.generations() == vec![Generation::new(2)]).await;
    let pid = snapshot.pid(Generation::new(2)).unwrap();

    let expected = format!("2:{pid}\n");
    let path = &status_file;
    let expected = &expected;
    eventually("status file to drop generation 1", || async move {
        std::fs::read_to_string(path)
            .ok()
            .filter(|contents| contents == expected)
    })
    .await;

    shutdown(handle).await;
}

/// Hands out a fresh value on every load.
struct Counter(AtomicU32);

#[async_trait::async_trait]
impl EnvSource for Counter {
    async fn load(&self) -> Result<Vec<EnvUpdate>, EnvDirError> {
        let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![("LOAD_COUNT".to_string(), Some(n.to_string()))])
    }
}

#[tokio::test]
async fn test_env_source_is_reloaded_for_every_generation() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let script = format!(
        "echo \"$SERVER_STARTER_GENERATION:$LOAD_COUNT\" >> {}; exec sleep 30",
        out.display()
    );

    let handle = sh_worker(&script)
        .with_env_source(Counter(AtomicU32::new(0)))
        .build()
        .unwrap()
        .run()
        .unwrap();

    snapshot_where(&handle, |s| s.len() == 1).await;
    handle.reload().unwrap();
    snapshot_where(&handle, |s| s.generations() == vec![Generation::new(2)]).await;

    let path = &out;
    let lines = eventually("both generations to report", || async move {
        let contents = std::fs::read_to_string(path).ok()?;
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        (lines.len() == 2).then_some(lines)
    })
    .await;
    assert_eq!(lines, vec!["1:1", "2:2"]);

    shutdown(handle).await;
}
