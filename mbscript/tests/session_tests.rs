//! End-to-end session tests against the reference child

use mbscript::{
    DeviceSpec, HostContext, ProgramSources, ScriptError, ScriptSession, ScriptSources,
    SessionConfig, SessionEvent,
};
use mbscript_common::health::{HealthStatus, SessionStatus};
use mbscript_common::shm::control::cycle_not_before;
use mbscript_common::shm::layout::BankCounts;
use mbscript_shared_memory::{ChannelError, ChannelName, ScriptChannel, get_current_pid, is_process_alive};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};

const NAMESPACE: &str = "mbscript.it";

static COUNTER: AtomicU32 = AtomicU32::new(0);

struct Fixture {
    _dir: TempDir,
    script: PathBuf,
    runtime_dir: PathBuf,
    port: String,
    device: String,
}

impl Fixture {
    fn new(tag: &str) -> Self {
        let dir = tempdir().unwrap();
        let script = dir.path().join("device.py");
        std::fs::write(&script, "print('hello')\nsecond line\n").unwrap();
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            runtime_dir: dir.path().join("run"),
            _dir: dir,
            script,
            port: format!("port{}", get_current_pid()),
            device: format!("{tag}{n}"),
        }
    }

    fn spec(&self, counts: BankCounts) -> DeviceSpec {
        DeviceSpec::new(
            self.port.clone(),
            self.device.clone(),
            counts,
            ScriptSources::File(self.script.clone()),
        )
    }

    fn channel_name(&self) -> ChannelName {
        ChannelName::for_device(NAMESPACE, &self.port, &self.device).unwrap()
    }

    fn config(&self, mode: &str) -> SessionConfig {
        SessionConfig::new(env!("CARGO_BIN_EXE_mbscript_peer"))
            .with_timeout_start(Duration::from_secs(5))
            .with_timeout_stop(Duration::from_millis(50))
            .with_runtime_dir(self.runtime_dir.clone())
            .with_env("MBSCRIPT_PEER_MODE", mode)
    }
}

fn context() -> (HostContext, flume::Receiver<SessionEvent>) {
    HostContext::new(NAMESPACE, vec![PathBuf::from("/project"), PathBuf::from("/app/script/server")])
}

fn log_lines(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Log(line) => Some(line.text.clone()),
            _ => None,
        })
        .collect()
}

fn finished(events: &[SessionEvent]) -> Vec<SessionStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Finished { status, .. } => Some(status.clone()),
            _ => None,
        })
        .collect()
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn end_to_end_with_counts() {
    let fx = Fixture::new("e2e");
    let (ctx, events) = context();
    let counts = BankCounts::new(10, 10, 5, 20);
    let mut session = ScriptSession::new(ctx, fx.spec(counts), fx.config("normal"));

    let pid = session.start().unwrap();
    assert!(session.is_running());
    assert_eq!(session.pid(), Some(pid));

    let observer = ScriptChannel::attach(&fx.channel_name()).unwrap();
    assert_eq!(observer.control().counts(), counts);
    assert!(observer.control().is_running());
    assert_eq!(observer.size(), 4096);

    wait_for(|| session.heartbeat().host_cycle > 5 && session.heartbeat().script_cycle > 5);

    let report = session.stop().unwrap();
    assert!(!report.forced);
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.pid, pid);
    assert!(report.heartbeat.host_cycle > 5);
    assert!(!observer.control().is_running());
    assert!(!is_process_alive(pid));

    drop(observer);
    assert!(!fx.channel_name().path().exists());

    let events: Vec<_> = events.try_iter().collect();
    let started_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::Started { pid: p, .. } if *p == pid))
        .expect("Started event");
    let finished_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::Finished { .. }))
        .expect("Finished event");
    assert!(started_at < finished_at);
    let lines = log_lines(&events);
    assert!(lines.contains(&"print('hello')".to_string()));
    assert!(lines.contains(&"second line".to_string()));
    assert!(lines.contains(&"importpath: /project;/app/script/server".to_string()));
    assert!(lines.contains(&"counts: 10 10 5 20".to_string()));
    assert!(lines.contains(&"final".to_string()));
    assert_eq!(finished(&events), [SessionStatus::Stopped { forced: false }]);
    assert!(events.iter().all(|e| e.device() == fx.device));
}

#[test]
fn immediate_exit_is_start_timeout() {
    let fx = Fixture::new("exit");
    let (ctx, events) = context();
    let timeout = Duration::from_millis(500);
    let config = fx.config("exit").with_timeout_start(timeout);
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), config);

    let started = Instant::now();
    let result = session.start();
    assert!(started.elapsed() <= timeout + Duration::from_millis(200));
    assert!(matches!(result, Err(ScriptError::StartTimeout { .. })));
    assert!(!session.is_running());
    assert!(!fx.channel_name().path().exists());

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(finished(&events), [SessionStatus::StartTimeout]);
    assert!(log_lines(&events).contains(&"second line".to_string()));
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Started { .. })));
}

#[test]
fn silent_child_times_out_and_is_killed() {
    let fx = Fixture::new("mute");
    let (ctx, events) = context();
    let timeout = Duration::from_millis(200);
    let config = fx.config("mute").with_timeout_start(timeout);
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), config);

    let started = Instant::now();
    assert!(matches!(session.start(), Err(ScriptError::StartTimeout { .. })));
    assert!(started.elapsed() >= timeout);
    assert!(!fx.channel_name().path().exists());

    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(finished(&events), [SessionStatus::StartTimeout]);
}

#[test]
fn stubborn_child_is_forced_exactly_once() {
    let fx = Fixture::new("stubborn");
    let (ctx, events) = context();
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(8, 8, 4, 4)), fx.config("stubborn"));

    let pid = session.start().unwrap();
    wait_for(|| session.heartbeat().script_cycle > 0);

    let begin = Instant::now();
    let report = session.stop().unwrap();
    assert!(report.forced);
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert!(!is_process_alive(pid));

    let again = session.stop().unwrap();
    assert_eq!(again, report);

    let events: Vec<_> = events.try_iter().collect();
    let forced = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::ForcedTermination { .. }))
        .count();
    assert_eq!(forced, 1);
    assert_eq!(finished(&events), [SessionStatus::Stopped { forced: true }]);
}

#[test]
fn host_cycle_never_decreases() {
    let fx = Fixture::new("cycle");
    let (ctx, _events) = context();
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), fx.config("normal"));
    session.start().unwrap();

    let first = session.heartbeat().host_cycle;
    let mut previous = first;
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(1));
        let current = session.heartbeat().host_cycle;
        assert!(cycle_not_before(previous, current), "{previous} -> {current}");
        previous = current;
    }
    assert_ne!(previous, first);
    session.stop().unwrap();
}

#[test]
fn health_reports_progress_then_exit() {
    let fx = Fixture::new("health");
    let (ctx, _events) = context();
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), fx.config("normal"));
    assert_eq!(session.health(), HealthStatus::Unknown);

    session.start().unwrap();
    wait_for(|| session.health() == HealthStatus::Healthy);

    session.stop().unwrap();
    assert_eq!(session.health(), HealthStatus::Dead { exit_code: Some(0) });
}

#[test]
fn second_start_is_rejected() {
    let fx = Fixture::new("twice");
    let (ctx, _events) = context();
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), fx.config("normal"));
    session.start().unwrap();
    assert!(matches!(session.start(), Err(ScriptError::AlreadyStarted { .. })));
    session.stop().unwrap();
    assert!(matches!(session.start(), Err(ScriptError::AlreadyStarted { .. })));
}

#[test]
fn missing_interpreter_is_spawn_failed() {
    let fx = Fixture::new("spawn");
    let (ctx, events) = context();
    let config = SessionConfig::new("/nonexistent/python3");
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), config);

    assert!(matches!(session.start(), Err(ScriptError::SpawnFailed { .. })));
    assert!(!fx.channel_name().path().exists());
    let events: Vec<_> = events.try_iter().collect();
    assert!(matches!(finished(&events).as_slice(), [SessionStatus::SpawnFailed(_)]));
}

#[test]
fn channel_conflict_prevents_spawn() {
    let fx = Fixture::new("conflict");
    let (ctx, events) = context();
    let _holder = ScriptChannel::open(&fx.channel_name(), 8192).unwrap();
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(10, 10, 5, 20)), fx.config("normal"));

    match session.start() {
        Err(ScriptError::Channel {
            source: ChannelError::SizeMismatch { expected, actual, .. },
        }) => {
            assert_eq!(expected, 4096);
            assert_eq!(actual, 8192);
        }
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
    let events: Vec<_> = events.try_iter().collect();
    assert!(matches!(finished(&events).as_slice(), [SessionStatus::ChannelError(_)]));
    assert!(log_lines(&events).is_empty());
}

#[test]
fn held_region_is_not_taken_over() {
    let fx = Fixture::new("held");
    let (ctx, events) = context();
    let counts = BankCounts::new(1, 1, 1, 1);
    let holder = ScriptChannel::open(&fx.channel_name(), 4096).unwrap();
    holder.control().host_prepare(BankCounts::new(3, 3, 3, 3));
    holder.control().host_bump_cycle();
    let mut session = ScriptSession::new(ctx, fx.spec(counts), fx.config("normal"));

    assert!(matches!(
        session.start(),
        Err(ScriptError::Channel {
            source: ChannelError::InUse { .. }
        })
    ));
    assert!(!session.is_running());
    assert_eq!(holder.control().counts(), BankCounts::new(3, 3, 3, 3));
    assert_eq!(holder.control().host_cycle(), 1);
    assert!(holder.control().is_running());

    let events: Vec<_> = events.try_iter().collect();
    assert!(matches!(finished(&events).as_slice(), [SessionStatus::ChannelError(_)]));
    assert!(log_lines(&events).is_empty());
}

#[test]
fn similar_device_names_get_separate_channels() {
    let fx = Fixture::new("similar");
    let (ctx, _events) = context();
    let spaced = format!("PLC {}", fx.device);
    let underscored = format!("PLC_{}", fx.device);
    let device = |name: &str, counts| {
        DeviceSpec::new(fx.port.clone(), name, counts, ScriptSources::File(fx.script.clone()))
    };
    let mut first = ScriptSession::new(ctx.clone(), device(&spaced, BankCounts::new(1, 1, 1, 1)), fx.config("normal"));
    let mut second = ScriptSession::new(ctx, device(&underscored, BankCounts::new(2, 2, 2, 2)), fx.config("normal"));

    first.start().unwrap();
    second.start().unwrap();

    let first_name = ChannelName::for_device(NAMESPACE, &fx.port, &spaced).unwrap();
    let second_name = ChannelName::for_device(NAMESPACE, &fx.port, &underscored).unwrap();
    assert_ne!(first_name, second_name);
    let first_view = ScriptChannel::attach(&first_name).unwrap();
    let second_view = ScriptChannel::attach(&second_name).unwrap();
    assert_eq!(first_view.control().counts(), BankCounts::new(1, 1, 1, 1));
    assert_eq!(second_view.control().counts(), BankCounts::new(2, 2, 2, 2));

    assert!(!first.stop().unwrap().forced);
    assert!(!second.stop().unwrap().forced);
}

#[test]
fn dropping_a_running_session_stops_it() {
    let fx = Fixture::new("drop");
    let (ctx, events) = context();
    let mut session = ScriptSession::new(ctx, fx.spec(BankCounts::new(1, 1, 1, 1)), fx.config("normal"));
    let pid = session.start().unwrap();

    drop(session);
    assert!(!is_process_alive(pid));
    assert!(!fx.channel_name().path().exists());
    let events: Vec<_> = events.try_iter().collect();
    assert_eq!(finished(&events), [SessionStatus::Stopped { forced: false }]);
}

#[test]
fn program_sources_are_rendered_before_spawn() {
    let fx = Fixture::new("program");
    let (ctx, events) = context();
    let device = DeviceSpec::new(
        fx.port.clone(),
        fx.device.clone(),
        BankCounts::new(1, 1, 1, 1),
        ScriptSources::Program(ProgramSources {
            init: "setup_marker = 1".into(),
            loop_body: "tick_marker()\n\n".into(),
            finalize: "final_marker()".into(),
        }),
    );
    let mut session = ScriptSession::new(ctx, device, fx.config("normal"));
    session.start().unwrap();
    session.stop().unwrap();

    let program = fx.runtime_dir.join(format!("{}.{}.program.py", fx.port, fx.device));
    assert!(program.exists());

    let lines = log_lines(&events.try_iter().collect::<Vec<_>>());
    assert!(lines.contains(&"setup_marker = 1".to_string()));
    assert!(lines.contains(&"    tick_marker()".to_string()));
    assert!(lines.contains(&"final_marker()".to_string()));
}
