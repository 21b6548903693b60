use async_trait::async_trait;
use ldapfix_core::{
    LaunchSpec, ProcessError, ProcessHandle, ProcessId, ProcessLauncher, ProcessStatus,
    ProcessStreams, SpawnError, TerminationResult,
};

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Signal the process group led by `pid`, falling back to the process itself
    fn signal_group(pid: ProcessId, signal: Signal) -> nix::Result<()> {
        let nix_pid = NixPid::from_raw(pid.0 as i32);
        match signal::killpg(nix_pid, signal) {
            Err(Errno::ESRCH) => signal::kill(nix_pid, signal),
            other => other,
        }
    }

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        pid: Option<ProcessId>,
        command: String,
        streams: Option<ProcessStreams>,
    }

    impl UnixProcessHandle {
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

        /// The pid while the child has not been reaped; signalling after that
        /// could hit an unrelated process that reused it
        fn live_pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
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
            let Some(pid) = self.live_pid() else {
                debug!(pid = ?self.pid, "Unix process already reaped");
                return false;
            };

            // Signal 0 only checks that the process exists
            let running = signal::kill(NixPid::from_raw(pid.0 as i32), None).is_ok();
            debug!(pid = %pid, running, "Checked Unix process");
            running
        }

        async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
            let status = self.child.wait().await?;
            Ok(ProcessStatus::Exited(status))
        }

        async fn stop_gracefully(&mut self) -> TerminationResult {
            let Some(pid) = self.live_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match signal_group(pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid = %pid, "Sent SIGTERM to process group");
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => {
                    debug!(pid = %pid, "Process not found (already terminated)");
                    TerminationResult::ProcessNotFound
                }
                Err(Errno::EPERM) => {
                    warn!(pid = %pid, "Permission denied to terminate process");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pid = %pid, error = %e, "Failed to send SIGTERM");
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        async fn kill(&mut self) -> Result<(), ProcessError> {
            let Some(pid) = self.live_pid() else {
                return Ok(());
            };

            match signal_group(pid, Signal::SIGKILL) {
                Ok(()) => info!(pid = %pid, "Sent SIGKILL to process group"),
                Err(Errno::ESRCH) => debug!(pid = %pid, "Process group already gone"),
                Err(e) => warn!(pid = %pid, error = %e, "Failed to send SIGKILL to process group"),
            }

            self.child
                .kill()
                .await
                .map_err(|e| ProcessError::Other(format!("Failed to kill process: {e}")))
        }

        fn terminate_now(&self) {
            if let Some(pid) = self.live_pid() {
                if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                    debug!(pid = %pid, error = %e, "SIGTERM from drop guard failed");
                }
            }
        }
    }

    /// Spawns server processes in their own process group
    #[derive(Debug, Default)]
    pub struct UnixProcessLauncher;

    impl UnixProcessLauncher {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl ProcessLauncher for UnixProcessLauncher {
        type Handle = UnixProcessHandle;

        async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, SpawnError> {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args)
                .current_dir(&spec.working_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            // A group of its own lets stop signals reach anything the server forks
            cmd.process_group(0);

            let child = cmd.spawn().map_err(|source| SpawnError {
                command: spec.program.clone(),
                source,
            })?;

            if let Some(pid) = child.id() {
                info!(pid = %pid, command = %spec.program, "Spawned Unix process");
            }

            Ok(UnixProcessHandle::new(child, spec.program.clone()))
        }

        fn platform_name(&self) -> &'static str {
            "unix"
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessLauncher};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
#[derive(Debug, Default)]
pub struct UnixProcessLauncher;

#[cfg(not(unix))]
impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}
