use ldapfix_core::ProcessLauncherFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformLauncherFactory;

impl ProcessLauncherFactory for PlatformLauncherFactory {
    #[cfg(unix)]
    type Launcher = ldapfix_unix::UnixProcessLauncher;

    #[cfg(windows)]
    type Launcher = ldapfix_windows::WindowsProcessLauncher;

    fn create_launcher() -> Self::Launcher {
        #[cfg(unix)]
        return ldapfix_unix::UnixProcessLauncherFactory::create_launcher();

        #[cfg(windows)]
        return ldapfix_windows::WindowsProcessLauncherFactory::create_launcher();
    }
}

/// The launcher type for the platform this crate was built for
pub type PlatformLauncher = <PlatformLauncherFactory as ProcessLauncherFactory>::Launcher;
