use async_trait::async_trait;
use ldapfix_core::{
    LaunchSpec, ProcessError, ProcessHandle, ProcessId, ProcessLauncher, ProcessStatus,
    ProcessStreams, SpawnError, TerminationResult,
};
use std::process::Stdio;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Check the process table for `pid`
fn process_exists(pid: ProcessId) -> bool {
    let pid = Pid::from_u32(pid.0);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Run taskkill against the tree rooted at `pid`; `Ok(false)` means it was not found
async fn taskkill_tree(pid: ProcessId, force: bool) -> std::io::Result<bool> {
    let pid_string = pid.0.to_string();
    let mut args = vec!["/T", "/PID", &pid_string];
    if force {
        args.push("/F");
    }

    let output = Command::new("taskkill")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await?;

    Ok(output.status.success())
}

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    pid: Option<ProcessId>,
    command: String,
    streams: Option<ProcessStreams>,
}

impl WindowsProcessHandle {
    fn new(mut child: Child, command: String) -> Self {
        let pid = child.id().map(ProcessId::from);
        let streams = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => Some(ProcessStreams {
                stdin,
                stdout,
                stderr,
            }),
            _ => None,
        };
        Self {
            child,
            pid,
            command,
            streams,
        }
    }

    fn live_pid(&self) -> Option<ProcessId> {
        self.child.id().map(ProcessId::from)
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn take_streams(&mut self) -> Result<ProcessStreams, ProcessError> {
        self.streams.take().ok_or(ProcessError::StreamsTaken)
    }

    async fn is_running(&self) -> bool {
        match self.live_pid() {
            Some(pid) => process_exists(pid),
            None => {
                debug!(pid = ?self.pid, "Windows process already reaped");
                false
            }
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    async fn stop_gracefully(&mut self) -> TerminationResult {
        let Some(pid) = self.live_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match taskkill_tree(pid, false).await {
            Ok(true) => {
                info!(pid = %pid, "Sent graceful termination to process tree");
                TerminationResult::Success
            }
            // Console processes without a window cannot be closed politely
            Ok(false) if process_exists(pid) => match self.child.start_kill() {
                Ok(()) => {
                    info!(pid = %pid, "Graceful termination refused; killed process");
                    TerminationResult::Success
                }
                Err(e) => {
                    warn!(pid = %pid, error = %e, "Failed to kill process");
                    TerminationResult::Failed(format!("Kill failed: {e}"))
                }
            },
            Ok(false) => {
                debug!(pid = %pid, "Process not found (already terminated)");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to run taskkill");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        let Some(pid) = self.live_pid() else {
            return Ok(());
        };

        match taskkill_tree(pid, true).await {
            Ok(true) => info!(pid = %pid, "Force killed process tree"),
            Ok(false) => debug!(pid = %pid, "Process tree not found for force kill"),
            Err(e) => warn!(pid = %pid, error = %e, "Failed to run taskkill"),
        }

        self.child
            .kill()
            .await
            .map_err(|e| ProcessError::Other(format!("Failed to kill process: {e}")))
    }

    fn terminate_now(&self) {
        let Some(pid) = self.live_pid() else {
            return;
        };

        let result = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.0.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = result {
            debug!(pid = %pid, error = %e, "taskkill from drop guard failed");
        }
    }
}

/// Spawns server processes without a console window
#[derive(Debug, Default)]
pub struct WindowsProcessLauncher;

impl WindowsProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for WindowsProcessLauncher {
    type Handle = WindowsProcessHandle;

    async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, SpawnError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x08000000);
        }

        let child = cmd.spawn().map_err(|source| SpawnError {
            command: spec.program.clone(),
            source,
        })?;

        if let Some(pid) = child.id() {
            info!(pid = %pid, command = %spec.program, "Spawned Windows process");
        }

        Ok(WindowsProcessHandle::new(child, spec.program.clone()))
    }

    fn platform_name(&self) -> &'static str {
        "windows"
    }
}
