//! Cycle counters sampled from outside the session worker.
//!
//! The worker publishes both counters after every tick. [`LivenessProbe`]
//! turns successive samples into a [`HealthStatus`]; it never acts on it.

use mbscript_common::health::HealthStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

/// Read-only snapshot of the two cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    /// Ticks of the host loop.
    pub host_cycle: u32,
    /// Iterations reported by the child.
    pub script_cycle: u32,
}

/// Shared slot the worker publishes into.
#[derive(Debug, Default)]
pub struct HeartbeatCell {
    host_cycle: AtomicU32,
    script_cycle: AtomicU32,
}

impl HeartbeatCell {
    /// Store the latest counters.
    pub fn publish(&self, heartbeat: Heartbeat) {
        self.host_cycle.store(heartbeat.host_cycle, Ordering::Release);
        self.script_cycle
            .store(heartbeat.script_cycle, Ordering::Release);
    }

    /// Latest published counters.
    pub fn snapshot(&self) -> Heartbeat {
        Heartbeat {
            host_cycle: self.host_cycle.load(Ordering::Acquire),
            script_cycle: self.script_cycle.load(Ordering::Acquire),
        }
    }
}

/// Compares successive heartbeats of one child.
#[derive(Debug, Default)]
pub struct LivenessProbe {
    last_script_cycle: Option<u32>,
    unchanged_samples: u32,
}

impl LivenessProbe {
    /// New probe with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a sample taken while the child is believed alive.
    ///
    /// The first sample only establishes a baseline and reports `Unknown`.
    pub fn observe(&mut self, heartbeat: Heartbeat) -> HealthStatus {
        let previous = self.last_script_cycle.replace(heartbeat.script_cycle);
        match previous {
            None => HealthStatus::Unknown,
            Some(prev) if prev != heartbeat.script_cycle => {
                self.unchanged_samples = 0;
                HealthStatus::Healthy
            }
            Some(_) => {
                self.unchanged_samples = self.unchanged_samples.saturating_add(1);
                HealthStatus::Stale {
                    unchanged_samples: self.unchanged_samples,
                }
            }
        }
    }

    /// Report a child that has exited.
    pub fn observe_exit(&mut self, exit_code: Option<i32>) -> HealthStatus {
        self.last_script_cycle = None;
        self.unchanged_samples = 0;
        HealthStatus::Dead { exit_code }
    }
}
