//! Classification of the child's stderr into significant problems and trace chatter.

use crate::error::ConfigError;
use crate::sink::SharedSink;
use crate::watcher::{Frame, Watcher, for_each_line};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::debug;

static LEADING_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+):").expect("Invalid regex pattern for log token"));

/// Upstream messages that are logged at WARN/ERROR on every run and mean nothing
const KNOWN_BOGUS_WARNINGS: &[&str] = &[
    "shutdown hook has NOT been registered",
    "attributeType w/ OID 2.5.4.16 not registered",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Trace,
}

impl Severity {
    pub fn is_significant(self) -> bool {
        !matches!(self, Severity::Trace)
    }
}

/// One classified line of the child's stderr
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub text: String,
    pub severity: Severity,
}

/// Substrings that mark a WARN/ERROR line as known noise.
///
/// The wording is tied to a specific server build, so the list is data: it can
/// be extended in code or loaded from a JSON file of the form
/// `{"patterns": ["..."]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Denylist {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for Denylist {
    fn default() -> Self {
        Self {
            patterns: KNOWN_BOGUS_WARNINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Denylist {
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let to_config_error = |reason: String| ConfigError::Denylist {
            path: path.to_path_buf(),
            reason,
        };

        let json = std::fs::read_to_string(path).map_err(|e| to_config_error(e.to_string()))?;
        Self::from_json_str(&json).map_err(|e| to_config_error(e.to_string()))
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn matches(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| line.contains(p.as_str()))
    }
}

/// Decide what a single stderr line is worth
pub fn classify(line: &str, denylist: &Denylist) -> LogLine {
    let token = LEADING_TOKEN
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    let severity = match token {
        None => Severity::Error,
        Some("ERROR") => Severity::Error,
        Some("WARN") => Severity::Warning,
        Some(_) => Severity::Trace,
    };

    let severity = if severity.is_significant() && denylist.matches(line) {
        Severity::Trace
    } else {
        severity
    };

    LogLine {
        text: line.to_string(),
        severity,
    }
}

/// Drains the child's stderr on its own task and forwards each classified line
pub struct Classifier {
    watcher: Watcher,
}

impl Classifier {
    pub fn spawn<R>(stderr: R, denylist: Arc<Denylist>, sink: SharedSink) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let watcher = Watcher::spawn("classifier", async move {
            for_each_line(stderr, |frame| {
                let line = match frame {
                    Frame::Line(line) => line,
                    Frame::Overlong { limit } => {
                        sink.error(&format!(
                            "Server log line longer than {limit} bytes was dropped"
                        ));
                        return true;
                    }
                };
                let classified = classify(&line, &denylist);
                if classified.severity.is_significant() {
                    sink.error(&classified.text);
                } else {
                    sink.trace(&classified.text);
                }
                true
            })
            .await;
            debug!("Server stderr closed");
        });

        Self { watcher }
    }

    pub fn is_finished(&self) -> bool {
        self.watcher.is_finished()
    }

    pub async fn join(&mut self, grace: Duration) {
        self.watcher.join(grace).await
    }
}
