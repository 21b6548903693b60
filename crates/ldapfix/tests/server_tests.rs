#![cfg(unix)]

use ldapfix::{ConfigError, ControllerState, FnSink, Server, ServerConfig, StartupError};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};

/// Stands in for the Java server: speaks the handshake and reacts to `--fail <mode>`
const FAKE_SERVER: &str = r#"#!/bin/sh
mode=""
while [ $# -gt 0 ]; do
    if [ "$1" = "--fail" ]; then
        mode="$2"
    fi
    shift
done

case "$mode" in
    before_start)
        echo "FATAL: Expected failure for testing"
        exit 207
        ;;
    hang)
        echo $$ > "$(dirname "$0")/server.pid"
        exec sleep 60
        ;;
    garbage)
        echo "hello"
        exec sleep 60
        ;;
    exit_early)
        exit 3
        ;;
    ignore_stdin)
        trap 'exit 0' TERM
        echo "STARTED"
        while :; do sleep 1; done
        ;;
esac

echo "INFO: loading ldif" >&2
echo "WARN: shutdown hook has NOT been registered" >&2
echo "ERROR: disk full" >&2
echo "STARTED"
read line
echo "STOPPED"
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_file(true)
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

#[derive(Clone, Default)]
struct Captured {
    errors: Arc<Mutex<Vec<String>>>,
    traces: Arc<Mutex<Vec<String>>>,
}

impl Captured {
    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn traces(&self) -> Vec<String> {
        self.traces.lock().unwrap().clone()
    }
}

struct Fixture {
    bin: TempDir,
    _ldif: NamedTempFile,
    tmp_root: TempDir,
    script: PathBuf,
    ldif_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();

        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("fake_server.sh");
        std::fs::write(&script, FAKE_SERVER).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ldif = NamedTempFile::new().unwrap();
        let ldif_path = ldif.path().to_path_buf();

        Self {
            bin,
            _ldif: ldif,
            tmp_root: tempfile::tempdir().unwrap(),
            script,
            ldif_path,
        }
    }

    fn config(&self, fail: Option<&str>, timeout: Duration) -> ServerConfig {
        let mut builder = ServerConfig::builder();
        builder
            .java_bin(self.script.to_string_lossy())
            .ldif(&self.ldif_path)
            .tmpdir(self.tmp_root.path())
            .resources_dir(self.tmp_root.path())
            .timeout(timeout);
        if let Some(mode) = fail {
            builder.more_args(["--fail", mode]);
        }
        builder.build().unwrap()
    }

    fn server(&self, fail: Option<&str>, timeout: Duration) -> (Server, Captured) {
        let captured = Captured::default();
        let sink = {
            let errors = captured.errors.clone();
            let traces = captured.traces.clone();
            FnSink::new(
                move |m: &str| errors.lock().unwrap().push(m.to_string()),
                move |m: &str| traces.lock().unwrap().push(m.to_string()),
            )
        };
        let server = Server::with_sink(self.config(fail, timeout), Arc::new(sink));
        (server, captured)
    }

    /// Pid the fake server wrote before blocking, if it got that far
    fn server_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.bin.path().join("server.pid"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn run_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.tmp_root.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| is_run_dir(p))
            .collect()
    }
}

fn is_run_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("ldapfix-server-"))
}

/// Zombies count as dead: a process orphaned by a dropped `Child` may stay unreaped
fn process_alive(pid: u32) -> bool {
    let Ok(output) = std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
    else {
        return false;
    };
    let stat = String::from_utf8_lossy(&output.stdout);
    let stat = stat.trim();
    output.status.success() && !stat.is_empty() && !stat.starts_with('Z')
}

async fn wait_until_dead(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_start_and_stop() {
    let fixture = Fixture::new();
    let (mut server, _) = fixture.server(None, TIMEOUT);

    let ready = server.start().await.unwrap();
    assert!(server.is_running());
    assert_eq!(server.state(), Some(ControllerState::Started));
    assert_eq!(ready.port, 3897);
    assert!(ready.run_dir.is_dir());
    assert!(is_run_dir(&ready.run_dir));
    let pid = ready.pid.unwrap();

    server.stop().await.unwrap();
    assert!(!server.is_running());
    assert!(server.state().is_none());
    assert!(!ready.run_dir.exists());
    assert!(!process_alive(pid.0));
    assert!(fixture.run_dirs().is_empty());
}

#[tokio::test]
async fn test_start_twice_does_not_respawn() {
    let fixture = Fixture::new();
    let (mut server, _) = fixture.server(None, TIMEOUT);

    let first = server.start().await.unwrap();
    let second = server.start().await.unwrap();
    assert_eq!(first.pid, second.pid);
    assert_eq!(fixture.run_dirs().len(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_stop() {
    let fixture = Fixture::new();
    let (mut server, _) = fixture.server(None, TIMEOUT);

    let first = server.start().await.unwrap();
    server.stop().await.unwrap();
    let second = server.start().await.unwrap();

    assert_ne!(first.pid, second.pid);
    assert_ne!(first.run_dir, second.run_dir);
    assert!(server.is_running());

    server.stop().await.unwrap();
    assert!(fixture.run_dirs().is_empty());
}

#[tokio::test]
async fn test_fatal_before_started() {
    let fixture = Fixture::new();
    let (mut server, captured) = fixture.server(Some("before_start"), TIMEOUT);

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, StartupError::Failure { .. }));
    assert!(err.to_string().contains("Expected failure for testing"));
    assert!(!server.is_running());
    assert!(fixture.run_dirs().is_empty());

    let reports: Vec<_> = captured
        .errors()
        .into_iter()
        .filter(|e| e.contains("Expected failure for testing"))
        .collect();
    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn test_unexpected_output_fails_startup() {
    let fixture = Fixture::new();
    let (mut server, captured) = fixture.server(Some("garbage"), TIMEOUT);

    let started = Instant::now();
    let err = server.start().await.unwrap_err();
    assert_eq!(err.child_message(), Some("hello"));
    assert!(started.elapsed() < TIMEOUT);
    assert!(
        captured
            .errors()
            .contains(&"Unexpected server process output: hello".to_string())
    );
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_exit_without_handshake_fails_fast() {
    let fixture = Fixture::new();
    let (mut server, _) = fixture.server(Some("exit_early"), TIMEOUT);

    let started = Instant::now();
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, StartupError::Failure { .. }));
    assert!(started.elapsed() < TIMEOUT);
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_startup_timeout() {
    let fixture = Fixture::new();
    let timeout = Duration::from_secs(1);
    let (mut server, _) = fixture.server(Some("hang"), timeout);

    let started = Instant::now();
    let err = server.start().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        "LDAP server startup did not complete within 1 seconds"
    );
    // teardown included
    assert!(started.elapsed() < timeout + Duration::from_secs(8));
    assert!(!server.is_running());
    assert!(fixture.run_dirs().is_empty());

    let pid = fixture.server_pid().expect("fake server never wrote its pid");
    assert!(!process_alive(pid), "timed-out server {pid} is still running");
}

#[tokio::test]
async fn test_oversized_timeout_is_rejected_before_spawn() {
    let fixture = Fixture::new();
    let mut config = fixture.config(Some("hang"), TIMEOUT);
    config.timeout = Duration::MAX;
    let mut server = Server::new(config);

    let err = server.start().await.unwrap_err();
    assert!(matches!(
        err,
        StartupError::Config(ConfigError::TimeoutTooLong(_))
    ));
    assert!(!server.is_running());
    assert!(fixture.run_dirs().is_empty());
    assert!(fixture.server_pid().is_none());
}

#[tokio::test]
async fn test_stop_when_not_running() {
    let fixture = Fixture::new();
    let (mut server, _) = fixture.server(None, TIMEOUT);

    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_stderr_classification() {
    let fixture = Fixture::new();
    let (mut server, captured) = fixture.server(None, TIMEOUT);

    server.start().await.unwrap();
    server.stop().await.unwrap();

    assert_eq!(captured.errors(), vec!["ERROR: disk full"]);
    let traces = captured.traces();
    assert!(traces.contains(&"INFO: loading ldif".to_string()));
    assert!(traces.contains(&"WARN: shutdown hook has NOT been registered".to_string()));
}

#[tokio::test]
async fn test_spawn_failure() {
    let fixture = Fixture::new();
    let config = {
        let mut builder = ServerConfig::builder();
        builder
            .java_bin("/nonexistent/ldapfix-java")
            .ldif(&fixture.ldif_path)
            .tmpdir(fixture.tmp_root.path());
        builder.build().unwrap()
    };
    let mut server = Server::new(config);

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, StartupError::Spawn(_)));
    assert!(!server.is_running());
    assert!(fixture.run_dirs().is_empty());
}

#[tokio::test]
async fn test_drop_terminates_running_server() {
    let fixture = Fixture::new();
    // Survives stdin closing, so only the drop guard's signal can end it
    let (mut server, _) = fixture.server(Some("ignore_stdin"), TIMEOUT);

    let ready = server.start().await.unwrap();
    let pid = ready.pid.unwrap();
    assert!(process_alive(pid.0));
    drop(server);

    assert!(
        wait_until_dead(pid.0, Duration::from_secs(5)).await,
        "dropped server {pid} is still running"
    );
    assert!(!ready.run_dir.exists());
}
