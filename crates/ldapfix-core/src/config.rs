use crate::classifier::Denylist;
use crate::error::ConfigError;
use derive_builder::{Builder, UninitializedFieldError};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3897;
pub const DEFAULT_DOMAIN: &str = "dc=example,dc=org";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Longest startup wait accepted by `validate()`
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_JAVA_BIN: &str = "java";
pub const DEFAULT_MAIN_CLASS: &str = "net.detailedbalance.ladle.Main";

/// Environment variable pointing at the directory holding the server archives,
/// the wrapper classes and the default LDIF
pub const RESOURCES_ENV: &str = "LDAPFIX_RESOURCES";

/// Everything needed to launch and supervise one server
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(
    setter(into),
    build_fn(private, name = "fallible_build", error = "ConfigError")
)]
pub struct ServerConfig {
    /// Port the server listens on
    #[builder(default = "DEFAULT_PORT")]
    pub port: u16,

    /// Base DN of the served data; must start with `dc=`
    #[builder(default = "DEFAULT_DOMAIN.to_string()")]
    pub domain: String,

    /// LDIF file loaded into the server before it reports `STARTED`
    #[builder(default = "self.default_ldif()")]
    pub ldif: PathBuf,

    /// Root under which each run creates its own scratch directory
    #[builder(default = "std::env::temp_dir()")]
    pub tmpdir: PathBuf,

    #[builder(default = "true")]
    pub allow_anonymous: bool,

    /// Class names of additional schemas for the server to load
    #[builder(default, setter(custom))]
    pub custom_schemas: Vec<String>,

    /// Extra classpath entries appended after the bundled ones
    #[builder(default, setter(custom))]
    pub additional_classpath: Vec<PathBuf>,

    #[builder(default = "DEFAULT_JAVA_BIN.to_string()")]
    pub java_bin: String,

    #[builder(default = "DEFAULT_MAIN_CLASS.to_string()")]
    pub main_class: String,

    #[builder(default = "default_resources_dir()")]
    pub resources_dir: PathBuf,

    /// How long `start()` waits for `STARTED`
    #[builder(default = "DEFAULT_TIMEOUT")]
    pub timeout: Duration,

    /// Forward trace-level server output to the console
    #[builder(default)]
    pub verbose: bool,

    /// Suppress server error output on the console
    #[builder(default)]
    pub quiet: bool,

    /// Arguments appended verbatim to the server command line
    #[builder(default, setter(custom))]
    pub more_args: Vec<String>,

    #[builder(default)]
    pub denylist: Denylist,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.domain.starts_with("dc=") {
            return Err(ConfigError::InvalidDomain(self.domain.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }

        if self.timeout > MAX_TIMEOUT {
            return Err(ConfigError::TimeoutTooLong(self.timeout));
        }

        if !is_readable_file(&self.ldif) {
            return Err(ConfigError::UnreadableLdif(self.ldif.clone()));
        }

        Ok(())
    }
}

impl ServerConfigBuilder {
    /// Build and validate the configuration
    pub fn build(&self) -> Result<ServerConfig, ConfigError> {
        let config = self.fallible_build()?;
        config.validate()?;
        Ok(config)
    }

    pub fn custom_schemas<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.custom_schemas = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn additional_classpath<P: Into<PathBuf>, I: IntoIterator<Item = P>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        self.additional_classpath = Some(iter.into_iter().map(Into::into).collect());
        self
    }

    pub fn more_args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        self.more_args = Some(iter.into_iter().map(|s| s.to_string()).collect());
        self
    }

    fn default_ldif(&self) -> PathBuf {
        self.resources_dir
            .clone()
            .unwrap_or_else(default_resources_dir)
            .join("default.ldif")
    }
}

impl From<UninitializedFieldError> for ConfigError {
    fn from(e: UninitializedFieldError) -> Self {
        ConfigError::MissingField(e.field_name())
    }
}

fn default_resources_dir() -> PathBuf {
    std::env::var_os(RESOURCES_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("resources"))
}

fn is_readable_file(path: &Path) -> bool {
    std::fs::File::open(path)
        .and_then(|f| f.metadata())
        .is_ok_and(|m| m.is_file())
}
