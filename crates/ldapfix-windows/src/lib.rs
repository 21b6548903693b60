//! Windows-specific process launching

mod windows_process;

pub use windows_process::{WindowsProcessHandle, WindowsProcessLauncher};

/// Windows-specific launcher factory
pub struct WindowsProcessLauncherFactory;

impl ldapfix_core::ProcessLauncherFactory for WindowsProcessLauncherFactory {
    type Launcher = WindowsProcessLauncher;

    fn create_launcher() -> Self::Launcher {
        WindowsProcessLauncher::new()
    }
}
