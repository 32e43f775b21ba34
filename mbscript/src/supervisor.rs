//! Child process supervision.
//!
//! One supervisor owns at most one interpreter child. Waits are always
//! polled at the configured tick; nothing here blocks without a deadline
//! except reaping a child that was just killed.

use crate::error::{ScriptError, ScriptResult};
use crate::relay::{LogRelay, LogSink};
use mbscript_common::consts::CHANNEL_ENV;
use mbscript_shared_memory::ControlView;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything needed to launch the interpreter for one device.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    /// Interpreter executable.
    pub executable: PathBuf,
    /// Script or generated program passed after `-u`.
    pub script: PathBuf,
    /// `;` separated import path.
    pub import_path: String,
    /// Channel name exported as `MBSCRIPT_CHANNEL`.
    pub channel: String,
    /// Extra environment.
    pub env: Vec<(String, String)>,
}

impl ChildCommand {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-u")
            .arg(&self.script)
            .arg("--importpath")
            .arg(&self.import_path)
            .env(CHANNEL_ENV, &self.channel)
            .stdin(Stdio::null());

        // Pass RUST_LOG to subprocess if set
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// The child had to be killed.
    pub forced: bool,
    /// Exit code, `None` when killed by a signal or never started.
    pub exit_code: Option<i32>,
}

/// Owns the interpreter child and the relay over its output.
pub struct ProcessSupervisor {
    child: Option<Child>,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    relay: Option<LogRelay>,
    sink: Box<dyn LogSink>,
    device: String,
    poll_interval: Duration,
    forced: bool,
}

impl ProcessSupervisor {
    /// Supervisor for `device` relaying output to `sink`.
    pub fn new(device: impl Into<String>, sink: Box<dyn LogSink>, poll_interval: Duration) -> Self {
        Self {
            child: None,
            pid: None,
            exit_status: None,
            relay: None,
            sink,
            device: device.into(),
            poll_interval,
            forced: false,
        }
    }

    /// Spawn the child with stdout and stderr merged into one pipe.
    pub fn spawn(&mut self, cmd: &ChildCommand) -> ScriptResult<u32> {
        if self.pid.is_some() {
            return Err(ScriptError::AlreadyStarted {
                device: self.device.clone(),
            });
        }

        let (reader, writer) = merged_pipe()?;
        let spawned = {
            let mut command = cmd.command();
            command
                .stdout(Stdio::from(writer.try_clone()?))
                .stderr(Stdio::from(writer));
            command.spawn()
            // `command` drops here, closing our copies of the write end
        };
        let child = spawned.map_err(|e| ScriptError::SpawnFailed {
            program: cmd.executable.display().to_string(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        debug!(device = %self.device, pid, script = %cmd.script.display(), "interpreter spawned");
        self.child = Some(child);
        self.pid = Some(pid);
        self.relay = Some(LogRelay::new(reader, self.device.clone()));
        Ok(pid)
    }

    /// Spawn and wait until the child reports running.
    ///
    /// Running means the child is alive and has advanced `script_cycle`
    /// from zero. A child that exits first, or misses `timeout`, gives
    /// [`ScriptError::StartTimeout`] and is killed and reaped.
    pub fn start(
        &mut self,
        cmd: &ChildCommand,
        control: ControlView<'_>,
        timeout: Duration,
    ) -> ScriptResult<u32> {
        let pid = self.spawn(cmd)?;
        let deadline = Instant::now() + timeout;

        loop {
            self.pump_logs();
            if let Some(status) = self.poll_exit()? {
                self.pump_logs();
                self.flush_logs();
                warn!(device = %self.device, pid, %status, "script exited before reporting running");
                return Err(ScriptError::StartTimeout { timeout });
            }
            if control.script_cycle() != 0 {
                info!(device = %self.device, pid, "script reported running");
                return Ok(pid);
            }
            if Instant::now() >= deadline {
                self.kill_and_reap();
                self.pump_logs();
                self.flush_logs();
                return Err(ScriptError::StartTimeout { timeout });
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Ask the child to finish and wait up to `timeout` before killing it.
    pub fn stop(&mut self, control: ControlView<'_>, timeout: Duration) -> ScriptResult<StopOutcome> {
        control.host_clear_running();
        let deadline = Instant::now() + timeout;
        let mut forced = false;

        loop {
            self.pump_logs();
            if self.poll_exit()?.is_some() || self.child.is_none() {
                break;
            }
            if Instant::now() >= deadline {
                if !self.forced {
                    warn!(device = %self.device, pid = ?self.pid, ?timeout, "script ignored stop request, terminating");
                    forced = true;
                    self.forced = true;
                }
                self.kill_and_reap();
                break;
            }
            thread::sleep(self.poll_interval);
        }

        self.pump_logs();
        self.flush_logs();
        Ok(StopOutcome {
            forced,
            exit_code: self.exit_code(),
        })
    }

    /// Drain whatever the child has written so far.
    pub fn pump_logs(&mut self) {
        let Some(relay) = self.relay.as_mut() else {
            return;
        };
        if let Err(e) = relay.drain(self.sink.as_ref()) {
            warn!(device = %self.device, error = %e, "log relay failed, dropping child output");
            self.relay = None;
        }
    }

    fn flush_logs(&mut self) {
        if let Some(relay) = self.relay.as_mut() {
            relay.flush(self.sink.as_ref());
        }
    }

    /// Reap the child if it has exited, without blocking.
    pub fn poll_exit(&mut self) -> ScriptResult<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match child.try_wait()? {
            Some(status) => {
                debug!(device = %self.device, pid = child.id(), %status, "interpreter exited");
                self.exit_status = Some(status);
                self.child = None;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Child pid, once spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code of a reaped child.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|s| s.code())
    }

    /// `true` if the child was force-terminated.
    pub fn was_forced(&self) -> bool {
        self.forced
    }

    fn kill_and_reap(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill() {
            debug!(device = %self.device, error = %e, "kill failed, child already gone");
        }
        match child.wait() {
            Ok(status) => self.exit_status = Some(status),
            Err(e) => warn!(device = %self.device, error = %e, "failed to reap interpreter"),
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!(device = %self.device, pid = ?self.pid, "supervisor dropped with live child, killing");
            self.kill_and_reap();
        }
    }
}

/// Pipe whose write end is shared by the child's stdout and stderr.
///
/// The read end is non-blocking; both ends are close-on-exec so only the
/// descriptors installed as stdio reach the child.
fn merged_pipe() -> ScriptResult<(File, OwnedFd)> {
    let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)?;
    set_nonblocking(&read_fd)?;
    Ok((File::from(read_fd), write_fd))
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
