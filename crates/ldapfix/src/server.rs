use crate::factory::{PlatformLauncher, PlatformLauncherFactory};
use ldapfix_core::{
    ControllerState, ProcessId, ProcessLauncherFactory, Ready, ServerConfig, SharedSink,
    ShutdownError, StartupError, Supervisor,
};
use std::path::Path;

/// An embedded LDAP server for tests.
///
/// ```no_run
/// # async fn run() -> anyhow::Result<()> {
/// use ldapfix::{Server, ServerConfig};
///
/// let config = ServerConfig::builder().port(3897u16).build()?;
/// let mut server = Server::new(config);
/// server.start().await?;
/// // talk to ldap://localhost:3897
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    inner: Supervisor<PlatformLauncher>,
}

impl Server {
    /// Create a server that reports its output on the console
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Supervisor::new(config, PlatformLauncherFactory::create_launcher()),
        }
    }

    /// Create a server that reports its output to `sink`
    pub fn with_sink(config: ServerConfig, sink: SharedSink) -> Self {
        Self {
            inner: Supervisor::with_sink(config, PlatformLauncherFactory::create_launcher(), sink),
        }
    }

    /// Start the server and wait until it accepts connections
    pub async fn start(&mut self) -> Result<Ready, StartupError> {
        self.inner.start().await
    }

    /// Stop the server and remove its working directory
    pub async fn stop(&mut self) -> Result<(), ShutdownError> {
        self.inner.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn port(&self) -> u16 {
        self.inner.config().port
    }

    pub fn config(&self) -> &ServerConfig {
        self.inner.config()
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.inner.pid()
    }

    pub fn state(&self) -> Option<ControllerState> {
        self.inner.state()
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.inner.run_dir()
    }

    pub fn platform_name(&self) -> &'static str {
        self.inner.platform_name()
    }
}
