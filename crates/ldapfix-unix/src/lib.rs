mod unix_process;

pub use unix_process::{UnixProcessHandle, UnixProcessLauncher};

pub struct UnixProcessLauncherFactory;

#[cfg(unix)]
impl ldapfix_core::ProcessLauncherFactory for UnixProcessLauncherFactory {
    type Launcher = UnixProcessLauncher;

    fn create_launcher() -> Self::Launcher {
        UnixProcessLauncher::new()
    }
}
