//! Script session: one interpreter child driving one device.
//!
//! A session is started once and stopped once. The worker thread owns the
//! channel and the supervisor and runs the cooperative loop; the session
//! handle talks to it through an atomic stop flag, the published heartbeat
//! and the start result channel. Everything else the host needs arrives as
//! [`SessionEvent`]s on the context's channel.

use crate::config::SessionConfig;
use crate::error::{ScriptError, ScriptResult};
use crate::event::SessionEvent;
use crate::heartbeat::{Heartbeat, HeartbeatCell, LivenessProbe};
use crate::program::{ScriptSources, compose_import_path};
use crate::relay::{EventSink, TracingSink};
use crate::supervisor::{ChildCommand, ProcessSupervisor};
use mbscript_common::health::{HealthStatus, SessionStatus};
use mbscript_common::shm::layout::{BankCounts, RegionLayout};
use mbscript_shared_memory::{ChannelError, ChannelName, ScriptChannel};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Host-wide state handed to every session.
#[derive(Debug, Clone)]
pub struct HostContext {
    namespace: String,
    import_roots: Vec<PathBuf>,
    events: flume::Sender<SessionEvent>,
}

impl HostContext {
    /// New context plus the receiving end of its event channel.
    pub fn new(
        namespace: impl Into<String>,
        import_roots: Vec<PathBuf>,
    ) -> (Self, flume::Receiver<SessionEvent>) {
        let (events, receiver) = flume::unbounded();
        (Self::with_sender(namespace, import_roots, events), receiver)
    }

    /// Context sending into an existing channel.
    pub fn with_sender(
        namespace: impl Into<String>,
        import_roots: Vec<PathBuf>,
        events: flume::Sender<SessionEvent>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            import_roots,
            events,
        }
    }

    /// Channel name prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Import path entries placed before any configured extras.
    pub fn import_roots(&self) -> &[PathBuf] {
        &self.import_roots
    }

    /// Clone of the event sender.
    pub fn sender(&self) -> flume::Sender<SessionEvent> {
        self.events.clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No receiver left means the host stopped listening; not an error.
        let _ = self.events.send(event);
    }
}

/// The device a session runs for.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    /// Port the device belongs to.
    pub port_name: String,
    /// Device name, unique within its port.
    pub device_name: String,
    /// Bank sizes mirrored into the channel.
    pub counts: BankCounts,
    /// Script to run.
    pub sources: ScriptSources,
}

impl DeviceSpec {
    /// Describe a device.
    pub fn new(
        port_name: impl Into<String>,
        device_name: impl Into<String>,
        counts: BankCounts,
        sources: ScriptSources,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            device_name: device_name.into(),
            counts,
            sources,
        }
    }
}

/// What `stop()` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Device name.
    pub device: String,
    /// Child process id.
    pub pid: u32,
    /// The child was killed after the stop timeout.
    pub forced: bool,
    /// Child exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    /// Counters at the moment the loop ended.
    pub heartbeat: Heartbeat,
}

#[derive(Debug, Default)]
struct WorkerExit {
    forced: bool,
    exit_code: Option<i32>,
}

enum State {
    Idle,
    Running {
        worker: JoinHandle<WorkerExit>,
        pid: u32,
    },
    Stopped(StopReport),
    Failed,
}

/// Handle to one script session.
pub struct ScriptSession {
    ctx: HostContext,
    device: DeviceSpec,
    config: SessionConfig,
    stop: Arc<AtomicBool>,
    heartbeat: Arc<HeartbeatCell>,
    probe: Mutex<LivenessProbe>,
    state: State,
}

impl ScriptSession {
    /// Session for `device`; nothing runs until [`start`](Self::start).
    pub fn new(ctx: HostContext, device: DeviceSpec, config: SessionConfig) -> Self {
        Self {
            ctx,
            device,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            heartbeat: Arc::new(HeartbeatCell::default()),
            probe: Mutex::new(LivenessProbe::new()),
            state: State::Idle,
        }
    }

    /// Device this session runs for.
    pub fn device(&self) -> &DeviceSpec {
        &self.device
    }

    /// Launch the worker and block until the child runs or start fails.
    ///
    /// Returns the child pid. A session can be started only once.
    pub fn start(&mut self) -> ScriptResult<u32> {
        if !matches!(self.state, State::Idle) {
            return Err(ScriptError::AlreadyStarted {
                device: self.device.device_name.clone(),
            });
        }
        self.state = State::Failed;

        let (started_tx, started_rx) = flume::bounded(1);
        let worker = Worker {
            ctx: self.ctx.clone(),
            device: self.device.clone(),
            config: self.config.clone(),
            stop: Arc::clone(&self.stop),
            heartbeat: Arc::clone(&self.heartbeat),
        };
        let handle = thread::Builder::new()
            .name(format!("script-{}", self.device.device_name))
            .spawn(move || worker.run(started_tx))?;

        match started_rx.recv() {
            Ok(Ok(pid)) => {
                self.state = State::Running {
                    worker: handle,
                    pid,
                };
                Ok(pid)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(flume::RecvError::Disconnected) => {
                let _ = handle.join();
                error!(device = %self.device.device_name, "script worker died during start");
                Err(ScriptError::WorkerPanicked {
                    device: self.device.device_name.clone(),
                })
            }
        }
    }

    /// Stop the child and join the worker.
    ///
    /// Calling it again after a successful stop returns the same report.
    pub fn stop(&mut self) -> ScriptResult<StopReport> {
        match std::mem::replace(&mut self.state, State::Failed) {
            State::Running { worker, pid } => {
                self.stop.store(true, Ordering::Release);
                let exit = worker.join().map_err(|_| ScriptError::WorkerPanicked {
                    device: self.device.device_name.clone(),
                })?;
                let report = StopReport {
                    device: self.device.device_name.clone(),
                    pid,
                    forced: exit.forced,
                    exit_code: exit.exit_code,
                    heartbeat: self.heartbeat.snapshot(),
                };
                self.state = State::Stopped(report.clone());
                Ok(report)
            }
            State::Stopped(report) => {
                self.state = State::Stopped(report.clone());
                Ok(report)
            }
            other => {
                self.state = other;
                Err(ScriptError::NotStarted {
                    device: self.device.device_name.clone(),
                })
            }
        }
    }

    /// `true` between a successful start and stop.
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Child pid while running or after stop.
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            State::Running { pid, .. } => Some(*pid),
            State::Stopped(report) => Some(report.pid),
            _ => None,
        }
    }

    /// Latest published cycle counters.
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.snapshot()
    }

    /// Liveness from the heartbeat history. Reports only, never acts.
    pub fn health(&self) -> HealthStatus {
        let mut probe = self.probe.lock();
        match &self.state {
            State::Idle => HealthStatus::Unknown,
            State::Running { .. } => probe.observe(self.heartbeat.snapshot()),
            State::Stopped(report) => probe.observe_exit(report.exit_code),
            State::Failed => probe.observe_exit(None),
        }
    }
}

impl Drop for ScriptSession {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                error!(device = %self.device.device_name, error = %e, "failed to stop script session on drop");
            }
        }
    }
}

struct Worker {
    ctx: HostContext,
    device: DeviceSpec,
    config: SessionConfig,
    stop: Arc<AtomicBool>,
    heartbeat: Arc<HeartbeatCell>,
}

impl Worker {
    fn run(self, started: flume::Sender<ScriptResult<u32>>) -> WorkerExit {
        let device = self.device.device_name.clone();
        let sink = (TracingSink, EventSink::new(self.ctx.sender()));
        let mut supervisor =
            ProcessSupervisor::new(device.clone(), Box::new(sink), self.config.poll_interval);

        let (channel, pid) = match self.launch(&mut supervisor) {
            Ok(launched) => launched,
            Err(e) => {
                error!(device = %device, error = %e, "script session failed to start");
                self.ctx.emit(SessionEvent::Finished {
                    device,
                    status: start_failure_status(&e),
                });
                let _ = started.send(Err(e));
                return WorkerExit::default();
            }
        };

        self.ctx.emit(SessionEvent::Started {
            device: device.clone(),
            pid,
        });
        let _ = started.send(Ok(pid));

        let control = channel.control();
        let mut exit_reported = false;
        while !self.stop.load(Ordering::Acquire) {
            supervisor.pump_logs();
            if !exit_reported {
                match supervisor.poll_exit() {
                    Ok(Some(status)) => {
                        warn!(device = %device, pid, %status, "script exited while session is running");
                        exit_reported = true;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(device = %device, error = %e, "failed to poll script process");
                        exit_reported = true;
                    }
                }
            }
            let host_cycle = control.host_bump_cycle();
            self.heartbeat.publish(Heartbeat {
                host_cycle,
                script_cycle: control.script_cycle(),
            });
            thread::sleep(self.config.poll_interval);
        }

        let exit = match supervisor.stop(control, self.config.timeout_stop) {
            Ok(outcome) => {
                if outcome.forced {
                    self.ctx.emit(SessionEvent::ForcedTermination {
                        device: device.clone(),
                    });
                }
                info!(device = %device, pid, forced = outcome.forced, exit_code = ?outcome.exit_code, "script session stopped");
                self.ctx.emit(SessionEvent::Finished {
                    device: device.clone(),
                    status: SessionStatus::Stopped {
                        forced: outcome.forced,
                    },
                });
                WorkerExit {
                    forced: outcome.forced,
                    exit_code: outcome.exit_code,
                }
            }
            Err(e) => {
                error!(device = %device, error = %e, "script session failed while stopping");
                self.ctx.emit(SessionEvent::Finished {
                    device: device.clone(),
                    status: SessionStatus::Failed(e.to_string()),
                });
                WorkerExit {
                    forced: supervisor.was_forced(),
                    exit_code: supervisor.exit_code(),
                }
            }
        };
        self.heartbeat.publish(Heartbeat {
            host_cycle: control.host_cycle(),
            script_cycle: control.script_cycle(),
        });
        exit
    }

    /// Open the channel, publish the layout and start the child.
    ///
    /// The session must be the one that initialized the region; a region
    /// another handle already holds belongs to a live session.
    fn launch(&self, supervisor: &mut ProcessSupervisor) -> ScriptResult<(ScriptChannel, u32)> {
        let device = &self.device;
        let layout = RegionLayout::new(device.counts).map_err(ChannelError::from)?;
        let name = ChannelName::for_device(self.ctx.namespace(), &device.port_name, &device.device_name)?;
        let channel = ScriptChannel::open(&name, layout.region_size())?;
        if !channel.is_initializer() {
            return Err(ChannelError::InUse {
                name: name.to_string(),
            }
            .into());
        }

        let script = match &device.sources {
            ScriptSources::File(path) => path.clone(),
            ScriptSources::Program(sources) => self.config.template.write_program(
                &self.config.runtime_dir,
                &device.port_name,
                &device.device_name,
                sources,
            )?,
        };
        channel.control().host_prepare(device.counts);

        let cmd = ChildCommand {
            executable: self.config.interpreter.clone(),
            script,
            import_path: compose_import_path(self.ctx.import_roots(), &self.config.import_paths),
            channel: name.to_string(),
            env: self.config.env.clone(),
        };
        match supervisor.start(&cmd, channel.control(), self.config.timeout_start) {
            Ok(pid) => Ok((channel, pid)),
            Err(e) => {
                channel.control().host_clear_running();
                Err(e)
            }
        }
    }
}

fn start_failure_status(err: &ScriptError) -> SessionStatus {
    match err {
        ScriptError::Channel { source } => SessionStatus::ChannelError(source.to_string()),
        ScriptError::StartTimeout { .. } => SessionStatus::StartTimeout,
        ScriptError::SpawnFailed { .. } => SessionStatus::SpawnFailed(err.to_string()),
        other => SessionStatus::Failed(other.to_string()),
    }
}
