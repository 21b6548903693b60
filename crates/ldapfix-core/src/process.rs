use crate::error::{ProcessError, SpawnError};
use crate::launch::LaunchSpec;
use async_trait::async_trait;
use std::fmt;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Status of a process after termination
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process status is unknown
    Unknown,
}

impl ProcessStatus {
    pub fn success(&self) -> bool {
        matches!(self, ProcessStatus::Exited(status) if status.success())
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// The termination request was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// The three standard streams of a freshly spawned child
pub struct ProcessStreams {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Handle to exactly one running OS process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID, resolving it on first use where the platform requires it
    fn pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn command(&self) -> &str;

    /// Move the piped standard streams out of the handle. Only the first call succeeds.
    fn take_streams(&mut self) -> Result<ProcessStreams, ProcessError>;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Wait for the process to exit. Calling again after exit returns the same status.
    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError>;

    /// Ask the process to terminate (SIGTERM on Unix)
    async fn stop_gracefully(&mut self) -> TerminationResult;

    /// Force kill the process and reap it
    async fn kill(&mut self) -> Result<(), ProcessError>;

    /// Synchronous termination request for use from `Drop`, where nothing can be awaited
    fn terminate_now(&self);
}

/// Spawns processes for one platform
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// The type of process handle this launcher produces
    type Handle: ProcessHandle + 'static;

    /// Start the process described by `spec` with all three standard streams piped
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle, SpawnError>;

    /// Get the platform name for logging and debugging
    fn platform_name(&self) -> &'static str;
}

/// Factory trait for creating platform-specific launchers
pub trait ProcessLauncherFactory {
    /// The type of launcher this factory creates
    type Launcher: ProcessLauncher;

    /// Create a launcher for the current platform
    fn create_launcher() -> Self::Launcher;
}
