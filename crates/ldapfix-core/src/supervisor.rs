//! Start/stop orchestration of a single server lifecycle.

use crate::classifier::{Classifier, Denylist};
use crate::config::ServerConfig;
use crate::controller::{Controller, ControllerState};
use crate::error::{ConfigError, ProcessError, ShutdownError, StartupError};
use crate::launch::LaunchSpec;
use crate::process::{ProcessHandle, ProcessId, ProcessLauncher, ProcessStatus, TerminationResult};
use crate::sink::{ConsoleSink, SharedSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const RUN_DIR_PREFIX: &str = "ldapfix-server-";

/// How long a watcher may keep reading after the process has exited
const WATCHER_GRACE: Duration = Duration::from_secs(5);

/// How long the process gets to exit after STOP and SIGTERM before it is killed
const KILL_GRACE: Duration = Duration::from_secs(10);

const CLOSED_BEFORE_READY: &str = "server process closed its output before reporting readiness";

/// What a successful `start()` reports
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    pub pid: Option<ProcessId>,
    pub port: u16,
    pub run_dir: PathBuf,
    /// Time from spawn until `STARTED`
    pub elapsed: Duration,
}

/// Everything that exists only while a server is up
struct Lifecycle<H: ProcessHandle> {
    handle: H,
    controller: Controller,
    classifier: Classifier,
    run_dir: Option<TempDir>,
    ready: Option<Ready>,
    /// Set once startup succeeded; a dropped armed lifecycle signals its process
    armed: bool,
}

impl<H: ProcessHandle> Drop for Lifecycle<H> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                pid = ?self.handle.pid(),
                "Server dropped without stop(); terminating it"
            );
            self.handle.terminate_now();
        }
    }
}

/// Owns at most one running server and drives it through start and stop.
///
/// `start` and `stop` take `&mut self`; callers that share a supervisor wrap it
/// in a lock.
pub struct Supervisor<L: ProcessLauncher> {
    config: ServerConfig,
    launcher: L,
    sink: SharedSink,
    denylist: Arc<Denylist>,
    lifecycle: Option<Lifecycle<L::Handle>>,
}

impl<L: ProcessLauncher> Supervisor<L> {
    /// A supervisor reporting server output on the console
    pub fn new(config: ServerConfig, launcher: L) -> Self {
        let sink = Arc::new(ConsoleSink::new(config.quiet, config.verbose));
        Self::with_sink(config, launcher, sink)
    }

    pub fn with_sink(config: ServerConfig, launcher: L, sink: SharedSink) -> Self {
        let denylist = Arc::new(config.denylist.clone());
        Self {
            config,
            launcher,
            sink,
            denylist,
            lifecycle: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn platform_name(&self) -> &'static str {
        self.launcher.platform_name()
    }

    /// True from spawn until `stop()` has torn everything down
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_some()
    }

    pub fn state(&self) -> Option<ControllerState> {
        self.lifecycle.as_ref().map(|l| l.controller.state())
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.lifecycle.as_ref().and_then(|l| l.handle.pid())
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.lifecycle
            .as_ref()
            .and_then(|l| l.run_dir.as_ref())
            .map(TempDir::path)
    }

    /// Launch the server and wait until it reports readiness.
    ///
    /// Returns the existing `Ready` without respawning when already started.
    pub async fn start(&mut self) -> Result<Ready, StartupError> {
        if let Some(lifecycle) = &self.lifecycle {
            if let Some(ready) = &lifecycle.ready {
                debug!(pid = ?ready.pid, "Server already running");
                return Ok(ready.clone());
            }

            // Left behind by a start() future that was dropped mid-flight
            warn!("Discarding half-started server");
            if let Err(e) = self.stop().await {
                warn!(error = %e, "Cleaning up half-started server failed");
            }
        }

        self.config.validate()?;

        let run_dir = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(&self.config.tmpdir)
            .map_err(|source| StartupError::TempDir {
                root: self.config.tmpdir.clone(),
                source,
            })?;

        let spec = LaunchSpec::new(&self.config, run_dir.path())?;
        info!(
            platform = self.launcher.platform_name(),
            port = self.config.port,
            run_dir = %run_dir.path().display(),
            "Starting LDAP server"
        );
        debug!(command = %spec.command_line(), "Server command line");

        let started_at = Instant::now();
        let deadline = started_at
            .checked_add(spec.timeout)
            .ok_or(ConfigError::TimeoutTooLong(spec.timeout))?;
        let mut handle = self.launcher.spawn(&spec).await?;
        let streams = match handle.take_streams() {
            Ok(streams) => streams,
            Err(e) => {
                handle.stop_gracefully().await;
                if let Err(wait_error) = handle.wait().await {
                    warn!(error = %wait_error, "Waiting for unusable server process failed");
                }
                return Err(e.into());
            }
        };

        let classifier = Classifier::spawn(streams.stderr, self.denylist.clone(), self.sink.clone());
        let controller = Controller::spawn(streams.stdout, streams.stdin, self.sink.clone());
        let mut state = controller.subscribe();

        self.lifecycle = Some(Lifecycle {
            handle,
            controller,
            classifier,
            run_dir: Some(run_dir),
            ready: None,
            armed: false,
        });

        let outcome = tokio::time::timeout_at(
            deadline,
            state.wait_for(|s| matches!(s, ControllerState::Started | ControllerState::Error)),
        )
        .await
        .map(|reached| reached.map(|s| *s));

        let failure = match outcome {
            Ok(Ok(ControllerState::Started)) => None,
            Ok(Ok(_)) => Some(StartupError::Failure {
                message: self
                    .lifecycle
                    .as_ref()
                    .and_then(|l| l.controller.failure())
                    .unwrap_or_else(|| "server process reported an error".to_string()),
            }),
            Ok(Err(_)) => Some(StartupError::Failure {
                message: CLOSED_BEFORE_READY.to_string(),
            }),
            Err(_) => Some(StartupError::Timeout {
                timeout: spec.timeout,
            }),
        };

        if let Some(error) = failure {
            warn!(error = %error, "LDAP server startup failed");
            if let Err(e) = self.stop().await {
                warn!(error = %e, "Teardown after failed startup reported an error");
            }
            return Err(error);
        }

        let ready = Ready {
            pid: self.pid(),
            port: self.config.port,
            run_dir: spec.working_dir.clone(),
            elapsed: started_at.elapsed(),
        };
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.ready = Some(ready.clone());
            lifecycle.armed = true;
        }

        info!(
            pid = ?ready.pid,
            port = ready.port,
            elapsed_ms = ready.elapsed.as_millis() as u64,
            "LDAP server started"
        );
        Ok(ready)
    }

    /// Tear the running server down. Does nothing when not running.
    ///
    /// The supervisor is stopped afterwards even if an error is returned.
    pub async fn stop(&mut self) -> Result<(), ShutdownError> {
        let Some(mut lifecycle) = self.lifecycle.take() else {
            debug!("LDAP server not running; nothing to stop");
            return Ok(());
        };

        let pid = lifecycle.handle.pid();
        info!(pid = ?pid, "Stopping LDAP server");

        lifecycle.controller.stop().await;
        match lifecycle.handle.stop_gracefully().await {
            TerminationResult::Success => debug!(pid = ?pid, "Termination requested"),
            TerminationResult::ProcessNotFound => {
                debug!(pid = ?pid, "Server process already exited")
            }
            other => warn!(pid = ?pid, result = ?other, "Termination request failed"),
        }

        let waited = reap(&mut lifecycle.handle).await;

        lifecycle.controller.join(WATCHER_GRACE).await;
        lifecycle.classifier.join(WATCHER_GRACE).await;
        lifecycle.armed = false;

        let cleanup = match lifecycle.run_dir.take() {
            Some(dir) => {
                let path = dir.path().to_path_buf();
                dir.close()
                    .map_err(|source| ShutdownError::TempDirCleanup { path, source })
            }
            None => Ok(()),
        };
        drop(lifecycle);

        match &waited {
            Ok(status) => info!(pid = ?pid, status = ?status, "LDAP server stopped"),
            Err(e) => warn!(pid = ?pid, error = %e, "LDAP server stop incomplete"),
        }

        waited.map_err(|source| ShutdownError::Wait {
            pid: pid.map_or(0, |p| p.0),
            source,
        })?;
        cleanup
    }
}

/// Waits for the process to exit, killing it if it ignores the termination request
async fn reap<H: ProcessHandle>(handle: &mut H) -> Result<ProcessStatus, ProcessError> {
    match tokio::time::timeout(KILL_GRACE, handle.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                pid = ?handle.pid(),
                grace_secs = KILL_GRACE.as_secs(),
                "Server process did not exit; killing it"
            );
            handle.kill().await?;
            handle.wait().await
        }
    }
}
