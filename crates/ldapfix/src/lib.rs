//! ldapfix - an embedded LDAP server for tests
//!
//! Launches the bundled directory server as a child process, waits for it to
//! report readiness and tears it down again. Platform-specific process
//! handling is selected at compile time.

mod factory;
mod server;

pub use factory::{PlatformLauncher, PlatformLauncherFactory};
pub use server::Server;

// Re-export core functionality
pub use ldapfix_core::*;
