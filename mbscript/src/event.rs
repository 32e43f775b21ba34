//! Events a session reports back to its creator.

use mbscript_common::health::SessionStatus;
use serde::Serialize;

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// Fixed source label, always `"Script"`.
    pub source: &'static str,
    /// Device the child runs for.
    pub device: String,
    /// Line text without the terminator.
    pub text: String,
}

/// Notifications sent through the host context's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    /// Child reached the running state.
    Started {
        /// Device name
        device: String,
        /// Child process id
        pid: u32,
    },
    /// Relayed output line.
    Log(LogLine),
    /// Child ignored the stop request and was killed.
    ForcedTermination {
        /// Device name
        device: String,
    },
    /// Session ended; sent exactly once per started session.
    Finished {
        /// Device name
        device: String,
        /// Terminal status
        status: SessionStatus,
    },
}

impl SessionEvent {
    /// Device the event belongs to.
    pub fn device(&self) -> &str {
        match self {
            Self::Started { device, .. }
            | Self::ForcedTermination { device }
            | Self::Finished { device, .. } => device,
            Self::Log(line) => &line.device,
        }
    }
}
