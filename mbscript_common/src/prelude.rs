//! Prelude module for common re-exports.
//!
//! ```rust
//! use mbscript_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Health ─────────────────────────────────────────────────────────
pub use crate::health::{HealthStatus, SessionStatus};

// ─── Shared Memory Layout ───────────────────────────────────────────
pub use crate::shm::consts::{DEFAULT_NAMESPACE, SHM_PAGE_SIZE};
pub use crate::shm::control::{ControlBlock, ControlFlags, cycle_not_before};
pub use crate::shm::layout::{BankCounts, BankKind, LayoutError, RegionLayout};

/// Default cooperative loop tick as Duration.
pub const DEFAULT_POLL_INTERVAL: Duration =
    Duration::from_micros(crate::consts::DEFAULT_POLL_INTERVAL_US);
