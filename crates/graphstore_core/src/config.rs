//! Store and logging configuration.
//!
//! # Responsibility
//! - Carry the settings a store or the logger needs at construction time.
//! - Reject unset or invalid settings before any file is touched.
//!
//! # Invariants
//! - A validated `StoreConfig` names a file path, never a directory.
//! - Store type identifiers are dot-separated identifier segments.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Store type written to and expected in every document's metadata.
pub const DEFAULT_STORE_TYPE: &str = "graphstore.atomic";

pub const LOG_LEVEL_ENV: &str = "GRAPHSTORE_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "GRAPHSTORE_LOG_DIR";

static STORE_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*(\.[A-Za-z][A-Za-z0-9_-]*)*$")
        .expect("valid store type regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyPath,
    PathIsDirectory(PathBuf),
    InvalidStoreType(String),
    MissingEnv(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "store path is not set"),
            Self::PathIsDirectory(path) => {
                write!(f, "store path `{}` names a directory", path.display())
            }
            Self::InvalidStoreType(value) => write!(f, "invalid store type `{value}`"),
            Self::MissingEnv(name) => write!(f, "environment variable `{name}` is not set"),
        }
    }
}

impl Error for ConfigError {}

/// Settings for one atomic store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Document location; loaded and saved as a whole.
    pub path: PathBuf,
    /// Identifier stamped into metadata and checked on load.
    pub store_type: String,
    /// Create missing parent directories on save.
    pub create_parent_dirs: bool,
    /// Write indented JSON instead of compact JSON.
    pub pretty: bool,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store_type: DEFAULT_STORE_TYPE.to_string(),
            create_parent_dirs: false,
            pretty: false,
        }
    }

    pub fn with_store_type(mut self, store_type: impl Into<String>) -> Self {
        self.store_type = store_type.into();
        self
    }

    pub fn create_parent_dirs(mut self, enabled: bool) -> Self {
        self.create_parent_dirs = enabled;
        self
    }

    pub fn pretty(mut self, enabled: bool) -> Self {
        self.pretty = enabled;
        self
    }

    /// Checks that the path is set and the store type is well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        if self.path.file_name().is_none() || self.path.is_dir() {
            return Err(ConfigError::PathIsDirectory(self.path.clone()));
        }
        if !STORE_TYPE_RE.is_match(&self.store_type) {
            return Err(ConfigError::InvalidStoreType(self.store_type.clone()));
        }
        Ok(())
    }
}

/// Settings for the process-wide file logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Reads `GRAPHSTORE_LOG_DIR` (required) and `GRAPHSTORE_LOG_LEVEL`.
    ///
    /// The level falls back to the build-mode default when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_dir = std::env::var_os(LOG_DIR_ENV)
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingEnv(LOG_DIR_ENV))?;
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| crate::logging::default_log_level().to_string());
        Ok(Self::new(level, log_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, LoggingConfig, StoreConfig, DEFAULT_STORE_TYPE, LOG_DIR_ENV, LOG_LEVEL_ENV,
    };

    #[test]
    fn default_config_is_valid() {
        let config = StoreConfig::new("/tmp/graphstore/library.json");
        assert_eq!(config.store_type, DEFAULT_STORE_TYPE);
        config.validate().expect("default config should validate");
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = StoreConfig::new("").validate().unwrap_err();
        assert_eq!(err, ConfigError::EmptyPath);
    }

    #[test]
    fn directory_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::new(dir.path()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::PathIsDirectory(_)));
    }

    #[test]
    fn store_type_must_be_dotted_identifier() {
        let config = StoreConfig::new("/tmp/store.json").with_store_type("com.example.KStore");
        config.validate().unwrap();

        let err = StoreConfig::new("/tmp/store.json")
            .with_store_type("bad type")
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidStoreType("bad type".to_string()));
    }

    // Only test that touches these variables; the env is process-wide.
    #[test]
    fn logging_config_reads_env() {
        std::env::remove_var(LOG_DIR_ENV);
        std::env::set_var(LOG_LEVEL_ENV, "warn");
        assert_eq!(
            LoggingConfig::from_env().unwrap_err(),
            ConfigError::MissingEnv(LOG_DIR_ENV)
        );

        std::env::set_var(LOG_DIR_ENV, "");
        assert_eq!(
            LoggingConfig::from_env().unwrap_err(),
            ConfigError::MissingEnv(LOG_DIR_ENV)
        );

        std::env::set_var(LOG_DIR_ENV, "/var/log/graphstore");
        assert_eq!(
            LoggingConfig::from_env().unwrap(),
            LoggingConfig::new("warn", "/var/log/graphstore")
        );

        std::env::set_var(LOG_LEVEL_ENV, "  ");
        let config = LoggingConfig::from_env().unwrap();
        assert_eq!(config.level, crate::logging::default_log_level());

        std::env::remove_var(LOG_LEVEL_ENV);
        std::env::remove_var(LOG_DIR_ENV);
    }
}
