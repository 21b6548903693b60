use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The OS refused to create the child process
#[derive(Error, Debug)]
#[error("Failed to spawn {command}: {source}")]
pub struct SpawnError {
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

/// Ways in which `start()` can fail
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Server process setup failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Could not create temporary directory under {}: {source}", .root.display())]
    TempDir {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LDAP server failed to start: {message}")]
    Failure { message: String },

    #[error("LDAP server startup did not complete within {} seconds", format_secs(.timeout))]
    Timeout { timeout: Duration },
}

impl StartupError {
    /// The message reported by the child, if the failure came from the handshake
    pub fn child_message(&self) -> Option<&str> {
        match self {
            StartupError::Failure { message } => Some(message),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StartupError::Timeout { .. })
    }
}

/// Abnormal conditions hit while tearing a lifecycle down.
///
/// The supervisor is considered stopped even when one of these is returned.
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("Waiting for server process {pid} failed: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: ProcessError,
    },

    #[error("Deleting the temporary directory {} failed: {source}", .path.display())]
    TempDirCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error types for low-level process operations
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process streams were already taken")]
    StreamsTaken,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Invalid server configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("The domain component must start with 'dc='.  '{0}' does not.")]
    InvalidDomain(String),

    #[error("Cannot read specified LDIF file {}.", .0.display())]
    UnreadableLdif(PathBuf),

    #[error("Port must be non-zero")]
    InvalidPort,

    #[error("Startup timeout must be non-zero")]
    InvalidTimeout,

    #[error("Startup timeout of {}s is longer than the allowed maximum", .0.as_secs())]
    TimeoutTooLong(Duration),

    #[error("Could not load denylist from {}: {reason}", .path.display())]
    Denylist { path: PathBuf, reason: String },

    #[error("Invalid classpath entry: {0}")]
    InvalidClasspath(String),

    #[error("Missing configuration field: {0}")]
    MissingField(&'static str),
}

fn format_secs(timeout: &Duration) -> String {
    if timeout.subsec_millis() == 0 {
        timeout.as_secs().to_string()
    } else {
        format!("{:.1}", timeout.as_secs_f64())
    }
}
