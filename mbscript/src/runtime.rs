//! One script session per device.

use crate::config::SessionConfig;
use crate::error::{ScriptError, ScriptResult};
use crate::heartbeat::Heartbeat;
use crate::session::{DeviceSpec, HostContext, ScriptSession, StopReport};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info};

/// Identity of a device across ports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
    /// Port name.
    pub port: String,
    /// Device name.
    pub device: String,
}

impl DeviceKey {
    /// Key for `device` on `port`.
    pub fn new(port: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            device: device.into(),
        }
    }

    fn of(spec: &DeviceSpec) -> Self {
        Self::new(spec.port_name.clone(), spec.device_name.clone())
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.device)
    }
}

/// What `start_all` did for each device it tried.
#[derive(Debug, Default)]
pub struct StartSummary {
    /// Devices whose script is now running.
    pub started: Vec<DeviceKey>,
    /// Devices whose start failed, with the reason.
    pub failed: Vec<(DeviceKey, ScriptError)>,
}

impl StartSummary {
    /// `true` if no device failed.
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sessions of every scripted device, keyed by port and device name.
pub struct ScriptRuntime {
    ctx: HostContext,
    config: SessionConfig,
    sessions: BTreeMap<DeviceKey, ScriptSession>,
}

impl ScriptRuntime {
    /// Empty runtime; every session shares `ctx` and `config`.
    pub fn new(ctx: HostContext, config: SessionConfig) -> Self {
        Self {
            ctx,
            config,
            sessions: BTreeMap::new(),
        }
    }

    /// Register a device, replacing an idle session with the same key.
    pub fn add_device(&mut self, device: DeviceSpec) -> ScriptResult<()> {
        let key = DeviceKey::of(&device);
        if self.sessions.get(&key).is_some_and(ScriptSession::is_running) {
            return Err(ScriptError::AlreadyStarted {
                device: key.to_string(),
            });
        }
        let session = self.fresh_session(device);
        self.sessions.insert(key, session);
        Ok(())
    }

    /// Start every device that has a script and is not running yet.
    ///
    /// Devices without script sources are skipped. Each device starts on its
    /// own: a failure is recorded and the remaining devices are still
    /// started. A failed session is replaced by a fresh one so the next call
    /// retries it.
    pub fn start_all(&mut self) -> StartSummary {
        let mut summary = StartSummary::default();
        let mut retry = Vec::new();
        for (key, session) in &mut self.sessions {
            if session.device().sources.is_empty() {
                debug!(device = %key, "no script sources, session skipped");
                continue;
            }
            if session.is_running() {
                continue;
            }
            match session.start() {
                Ok(pid) => {
                    info!(device = %key, pid, "script session started");
                    summary.started.push(key.clone());
                }
                Err(e) => {
                    error!(device = %key, error = %e, "script session failed to start");
                    retry.push(session.device().clone());
                    summary.failed.push((key.clone(), e));
                }
            }
        }
        for device in retry {
            let session = self.fresh_session(device.clone());
            self.sessions.insert(DeviceKey::of(&device), session);
        }
        summary
    }

    /// Stop every running session, collecting the reports.
    ///
    /// A failing session is logged and does not keep the others running.
    pub fn stop_all(&mut self) -> Vec<StopReport> {
        let mut reports = Vec::new();
        for (key, session) in &mut self.sessions {
            if !session.is_running() {
                continue;
            }
            match session.stop() {
                Ok(report) => reports.push(report),
                Err(e) => error!(device = %key, error = %e, "failed to stop script session"),
            }
        }
        // Stopped sessions cannot be restarted; fresh ones take their place.
        let devices: Vec<DeviceSpec> = self.sessions.values().map(|s| s.device().clone()).collect();
        self.sessions.clear();
        for device in devices {
            let session = self.fresh_session(device.clone());
            self.sessions.insert(DeviceKey::of(&device), session);
        }
        reports
    }

    /// Heartbeat of a device's session.
    pub fn heartbeat(&self, port: &str, device: &str) -> Option<Heartbeat> {
        self.sessions
            .get(&DeviceKey::new(port, device))
            .map(ScriptSession::heartbeat)
    }

    /// `true` if the device's session is running.
    pub fn is_running(&self, port: &str, device: &str) -> bool {
        self.sessions
            .get(&DeviceKey::new(port, device))
            .is_some_and(ScriptSession::is_running)
    }

    /// Registered devices.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceKey> {
        self.sessions.keys()
    }

    fn fresh_session(&self, device: DeviceSpec) -> ScriptSession {
        ScriptSession::new(self.ctx.clone(), device, self.config.clone())
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ProgramSources, ScriptSources};
    use mbscript_common::shm::layout::BankCounts;

    #[test]
    fn devices_without_sources_are_skipped() {
        let (ctx, _rx) = HostContext::new("mbscript.rt", vec![]);
        let mut runtime = ScriptRuntime::new(ctx, SessionConfig::new("/nonexistent/interp"));
        runtime
            .add_device(DeviceSpec::new(
                "p",
                "quiet",
                BankCounts::new(1, 1, 1, 1),
                ScriptSources::Program(ProgramSources::default()),
            ))
            .unwrap();

        let summary = runtime.start_all();
        assert!(summary.started.is_empty());
        assert!(summary.all_started());
        assert!(!runtime.is_running("p", "quiet"));
        assert_eq!(runtime.heartbeat("p", "quiet"), Some(Heartbeat::default()));
        assert_eq!(runtime.heartbeat("p", "missing"), None);
        assert!(runtime.stop_all().is_empty());
        assert_eq!(runtime.devices().collect::<Vec<_>>(), [&DeviceKey::new("p", "quiet")]);
    }

    #[test]
    fn same_device_name_on_two_ports_is_kept_apart() {
        let (ctx, _rx) = HostContext::new("mbscript.rt", vec![]);
        let mut runtime = ScriptRuntime::new(ctx, SessionConfig::new("/nonexistent/interp"));
        for port in ["Port1", "Port2"] {
            runtime
                .add_device(DeviceSpec::new(port, "PLC1", BankCounts::default(), ScriptSources::File("x".into())))
                .unwrap();
        }
        let keys: Vec<String> = runtime.devices().map(ToString::to_string).collect();
        assert_eq!(keys, ["Port1/PLC1", "Port2/PLC1"]);
    }
}
