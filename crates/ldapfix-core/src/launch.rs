use crate::config::ServerConfig;
use crate::error::ConfigError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server implementation archives shipped under `<resources>/jars`
pub const SERVER_ARCHIVES: &[&str] = &[
    "apacheds-all-2.0.0-M16.jar",
    "commons-cli-1.2.jar",
    "commons-io-2.4.jar",
    "log4j-1.2.17.jar",
    "slf4j-api-1.7.5.jar",
    "slf4j-log4j12-1.7.5.jar",
];

/// Immutable description of one server launch
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Per-run scratch directory; also the child's working directory
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub verbose: bool,
    pub quiet: bool,
}

impl LaunchSpec {
    pub fn new(config: &ServerConfig, run_dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            program: config.java_bin.clone(),
            args: build_args(config, run_dir)?,
            working_dir: run_dir.to_path_buf(),
            timeout: config.timeout,
            verbose: config.verbose,
            quiet: config.quiet,
        })
    }

    /// The full command line, program first, for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Classpath built from the bundled archives, the wrapper classes and any extra entries
pub fn classpath(config: &ServerConfig) -> Result<OsString, ConfigError> {
    let jars = config.resources_dir.join("jars");
    let entries = SERVER_ARCHIVES
        .iter()
        .map(|jar| jars.join(jar))
        .chain(std::iter::once(config.resources_dir.join("java")))
        .chain(config.additional_classpath.iter().cloned());

    std::env::join_paths(entries).map_err(|e| ConfigError::InvalidClasspath(e.to_string()))
}

/// Arguments passed to the server executable
pub fn build_args(config: &ServerConfig, run_dir: &Path) -> Result<Vec<String>, ConfigError> {
    let mut args = vec![
        "-cp".to_string(),
        classpath(config)?.to_string_lossy().into_owned(),
        config.main_class.clone(),
        "--port".to_string(),
        config.port.to_string(),
        "--domain".to_string(),
        config.domain.clone(),
        "--ldif".to_string(),
        config.ldif.to_string_lossy().into_owned(),
        "--tmpdir".to_string(),
        run_dir.to_string_lossy().into_owned(),
    ];

    if !config.allow_anonymous {
        args.push("--no-anonymous".to_string());
    }

    if !config.custom_schemas.is_empty() {
        args.push("--custom-schemas".to_string());
        args.push(config.custom_schemas.join(","));
    }

    args.extend(config.more_args.iter().cloned());
    Ok(args)
}
