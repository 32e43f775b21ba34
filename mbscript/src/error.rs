//! Error types for the script bridge

use mbscript_common::config::ConfigError;
use mbscript_shared_memory::ChannelError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running a script session
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Shared memory channel could not be set up
    #[error("Channel error: {source}")]
    Channel {
        /// Source channel error
        #[from]
        source: ChannelError,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {source}")]
    Config {
        /// Source config error
        #[from]
        source: ConfigError,
    },

    /// Interpreter could not be launched
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed {
        /// Program that was launched
        program: String,
        /// OS error text
        reason: String,
    },

    /// Child did not reach a running state in time
    #[error("Script did not start within {timeout:?}")]
    StartTimeout {
        /// Configured start timeout
        timeout: Duration,
    },

    /// No interpreter candidate resolved to an executable
    #[error("No interpreter found (tried: {candidates})")]
    InterpreterNotFound {
        /// Candidates that were searched
        candidates: String,
    },

    /// Session was already started once
    #[error("Session for {device} was already started")]
    AlreadyStarted {
        /// Device name
        device: String,
    },

    /// Operation requires a started session
    #[error("Session for {device} is not running")]
    NotStarted {
        /// Device name
        device: String,
    },

    /// Session worker thread died without reporting
    #[error("Session worker for {device} panicked")]
    WorkerPanicked {
        /// Device name
        device: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for script bridge operations
pub type ScriptResult<T> = Result<T, ScriptError>;
