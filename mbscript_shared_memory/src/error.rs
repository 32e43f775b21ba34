//! Error types for shared memory channel operations

use mbscript_common::shm::layout::{BankKind, LayoutError};
use thiserror::Error;

/// Errors that can occur while opening or accessing a channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel name is empty or contains a path separator
    #[error("Invalid channel name: {name:?}")]
    InvalidName {
        /// Offending name
        name: String,
    },

    /// Region size outside the allowed range or not page aligned
    #[error("Invalid region size: {size} bytes (must be 4KB-1GB, page-aligned)")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// Region is held by another handle with a different size
    #[error("Channel {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Channel name
        name: String,
        /// Requested size
        expected: usize,
        /// Size found in the existing region
        actual: usize,
    },

    /// Region is already held by another session
    #[error("Channel {name} is already in use")]
    InUse {
        /// Channel name
        name: String,
    },

    /// Channel does not exist
    #[error("Channel not found: {name}")]
    NotFound {
        /// Channel name
        name: String,
    },

    /// Permission denied
    #[error("Permission denied accessing channel: {name}")]
    PermissionDenied {
        /// Channel name
        name: String,
    },

    /// System resources exhausted
    #[error("System resource exhausted while opening channel: {name}")]
    ResourceExhausted {
        /// Channel name
        name: String,
    },

    /// Element index past the end of a bank
    #[error("{} index {index} out of range (count {count})", .bank.prefix())]
    OutOfRange {
        /// Bank addressed
        bank: BankKind,
        /// Requested element or byte index
        index: usize,
        /// Elements or bytes available
        count: usize,
    },

    /// Operation does not apply to this bank type
    #[error("{op} is not supported on the {} bank", .bank.prefix())]
    WrongBank {
        /// Bank addressed
        bank: BankKind,
        /// Attempted operation
        op: &'static str,
    },

    /// Bank counts do not describe a valid layout
    #[error("Layout error: {source}")]
    Layout {
        /// Source layout error
        #[from]
        source: LayoutError,
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

impl ChannelError {
    /// Classify an IO error raised while opening `name`.
    pub fn from_io(name: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::NotFound {
                name: name.to_string(),
            },
            ErrorKind::PermissionDenied => Self::PermissionDenied {
                name: name.to_string(),
            },
            _ => match err.raw_os_error() {
                Some(libc::ENOSPC | libc::ENOMEM | libc::EMFILE | libc::ENFILE) => {
                    Self::ResourceExhausted {
                        name: name.to_string(),
                    }
                }
                _ => Self::Io { source: err },
            },
        }
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
