//! # Session Status and Liveness
//!
//! Vocabulary shared by the bridge and its callers for describing how a
//! script session ended and how alive its child currently looks.
//!
//! # Design
//!
//! Liveness is reported as data only. A stale script cycle is surfaced as
//! [`HealthStatus::Stale`]; what to do about it is the caller's decision.

use serde::{Deserialize, Serialize};

/// Health of a script child as observed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Child is alive and its script cycle advanced since the last sample.
    Healthy,
    /// Child is alive but its script cycle did not move (possible hang).
    Stale {
        /// Consecutive samples without progress.
        unchanged_samples: u32,
    },
    /// Child process has exited.
    Dead {
        /// Exit code if available.
        exit_code: Option<i32>,
    },
    /// Session not started, or nothing sampled yet.
    Unknown,
}

/// Single terminal status of a script session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Session ran and was stopped.
    Stopped {
        /// The child had to be killed after the stop window.
        forced: bool,
    },
    /// The child never reached a running state.
    StartTimeout,
    /// The shared memory channel could not be set up.
    ChannelError(String),
    /// The interpreter could not be launched.
    SpawnFailed(String),
    /// Any other fatal condition.
    Failed(String),
}

impl SessionStatus {
    /// `true` for outcomes that count as a successful session.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}
