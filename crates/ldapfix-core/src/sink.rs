//! Destinations for the child's log output and handshake errors.

use std::sync::Arc;

/// Receives lines from the supervised process.
///
/// `error` gets everything the caller should see (handshake failures and
/// significant stderr lines); `trace` gets routine chatter.
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str);

    fn trace(&self, message: &str);
}

pub type SharedSink = Arc<dyn LogSink>;

/// Writes to the parent's stderr, honouring the quiet/verbose flags
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink {
    quiet: bool,
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }
}

impl LogSink for ConsoleSink {
    fn error(&self, message: &str) {
        tracing::warn!(target: "ldapfix::server", "{message}");
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    fn trace(&self, message: &str) {
        tracing::trace!(target: "ldapfix::server", "{message}");
        if self.verbose {
            eprintln!("{message}");
        }
    }
}

/// Adapts a pair of closures into a [`LogSink`]
pub struct FnSink<E, T> {
    on_error: E,
    on_trace: T,
}

impl<E, T> FnSink<E, T>
where
    E: Fn(&str) + Send + Sync,
    T: Fn(&str) + Send + Sync,
{
    pub fn new(on_error: E, on_trace: T) -> Self {
        Self { on_error, on_trace }
    }
}

impl<E, T> LogSink for FnSink<E, T>
where
    E: Fn(&str) + Send + Sync,
    T: Fn(&str) + Send + Sync,
{
    fn error(&self, message: &str) {
        (self.on_error)(message)
    }

    fn trace(&self, message: &str) {
        (self.on_trace)(message)
    }
}
