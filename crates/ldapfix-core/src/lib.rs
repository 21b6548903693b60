//! ldapfix core - platform-independent supervision of a directory-server test fixture
//!
//! This crate provides the process traits, the stdout handshake controller, the
//! stderr classifier and the lifecycle supervisor. Platform crates implement
//! [`ProcessLauncher`] and the `ldapfix` crate ties them together.

pub mod classifier;
pub mod config;
pub mod controller;
mod error;
pub mod launch;
mod process;
pub mod sink;
mod supervisor;
mod watcher;

pub use classifier::{Classifier, Denylist, LogLine, Severity, classify};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use controller::{Controller, ControllerState};
pub use error::*;
pub use launch::LaunchSpec;
pub use process::*;
pub use sink::{ConsoleSink, FnSink, LogSink, SharedSink};
pub use supervisor::{Ready, Supervisor};
