//! System-wide constants for the mbscript workspace.
//!
//! Single source of truth for timing defaults and fixed labels.

/// Default time the child gets to report a running state, in milliseconds.
pub const DEFAULT_TIMEOUT_START_MS: u64 = 1000;

/// Default time the child gets to exit after the run flag clears, in milliseconds.
pub const DEFAULT_TIMEOUT_STOP_MS: u64 = 1000;

/// Default cooperative loop tick in microseconds (1 ms).
pub const DEFAULT_POLL_INTERVAL_US: u64 = 1000;

/// Source label attached to every line relayed from the child's output.
pub const LOG_SOURCE: &str = "Script";

/// Upper bound for a single relayed line before it is force-split.
pub const MAX_LOG_LINE: usize = 64 * 1024;

/// Default directory for generated programs.
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp/mbscript";

/// Environment variable carrying the channel name to the child.
pub const CHANNEL_ENV: &str = "MBSCRIPT_CHANNEL";

/// Separator used when joining the import path list for the child.
pub const IMPORT_PATH_SEPARATOR: char = ';';
