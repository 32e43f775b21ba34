//! TOML configuration plumbing shared by the workspace.
//!
//! Every mbscript binary reads a TOML file through the blanket
//! [`ConfigLoader`] trait and embeds [`SharedConfig`] for the settings all of
//! them share.
//!
//! ```rust,no_run
//! use mbscript_common::config::{ConfigError, ConfigLoader, SharedConfig};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct ToolConfig {
//!     #[serde(default)]
//!     shared: SharedConfig,
//! }
//!
//! # fn main() -> Result<(), ConfigError> {
//! let tool = ToolConfig::load("mbscript.toml".as_ref())?;
//! tool.shared.validate()?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Why a configuration could not be used.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("Config file not found")]
    FileNotFound,

    /// Unreadable file, bad TOML syntax or a mistyped field.
    #[error("Config parse error: {0}")]
    ParseError(String),

    /// Parsed, but a value is out of range.
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Default verbosity, written in lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-tick chatter.
    Trace,
    /// Channel and process lifecycle details.
    Debug,
    /// Session starts, stops and relayed script output.
    #[default]
    Info,
    /// Forced terminations and recoverable failures.
    Warn,
    /// Fatal session errors only.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// The `[shared]` section every mbscript config file may carry.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "mbscript"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Verbosity when neither `-v` nor `RUST_LOG` says otherwise.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Name this instance reports itself under.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "mbscript".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Reject an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load any deserializable config type from TOML.
///
/// Implemented for every `DeserializeOwned` type. A missing file is
/// [`ConfigError::FileNotFound`]; anything else that goes wrong while
/// reading or parsing is [`ConfigError::ParseError`].
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse TOML text.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
