//! Script runtime tests against the reference child

use mbscript::{
    DeviceKey, DeviceSpec, HostContext, ProgramSources, ScriptError, ScriptRuntime, ScriptSources,
    SessionConfig,
};
use mbscript_common::shm::layout::BankCounts;
use mbscript_shared_memory::get_current_pid;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn start_all_skips_devices_without_scripts() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("plc.py");
    std::fs::write(&script, "pass\n").unwrap();

    let (ctx, _events) = HostContext::new("mbscript.rt", vec![]);
    let config = SessionConfig::new(env!("CARGO_BIN_EXE_mbscript_peer"))
        .with_timeout_stop(Duration::from_millis(100))
        .with_runtime_dir(dir.path());
    let mut runtime = ScriptRuntime::new(ctx, config);
    let port = format!("rt{}", get_current_pid());

    runtime
        .add_device(DeviceSpec::new(&port, "PLC1", BankCounts::new(4, 4, 4, 4), ScriptSources::File(script)))
        .unwrap();
    runtime
        .add_device(DeviceSpec::new(
            &port,
            "PLC2",
            BankCounts::new(4, 4, 4, 4),
            ScriptSources::Program(ProgramSources::default()),
        ))
        .unwrap();

    let plc1 = DeviceKey::new(&port, "PLC1");
    assert_eq!(runtime.start_all().started, [plc1.clone()]);
    assert!(runtime.is_running(&port, "PLC1"));
    assert!(!runtime.is_running(&port, "PLC2"));
    assert!(runtime.add_device(DeviceSpec::new(&port, "PLC1", BankCounts::default(), ScriptSources::File("x".into()))).is_err());

    let reports = runtime.stop_all();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].device, "PLC1");
    assert!(!reports[0].forced);
    assert!(!runtime.is_running(&port, "PLC1"));

    // Stopped devices get fresh sessions and can run again.
    assert_eq!(runtime.start_all().started, [plc1]);
    assert_eq!(runtime.stop_all().len(), 1);
}

#[test]
fn failing_device_does_not_block_the_others() {
    let dir = tempdir().unwrap();
    let good_script = dir.path().join("good.py");
    std::fs::write(&good_script, "pass\n").unwrap();

    let (ctx, _events) = HostContext::new("mbscript.rt", vec![]);
    let config = SessionConfig::new(env!("CARGO_BIN_EXE_mbscript_peer"))
        .with_timeout_start(Duration::from_millis(300))
        .with_timeout_stop(Duration::from_millis(100))
        .with_runtime_dir(dir.path());
    let mut runtime = ScriptRuntime::new(ctx, config);
    let port = format!("mix{}", get_current_pid());

    // Sorted first, so it is tried before the healthy device.
    runtime
        .add_device(DeviceSpec::new(
            &port,
            "a_bad",
            BankCounts::new(1, 1, 1, 1),
            ScriptSources::File(dir.path().join("missing.py")),
        ))
        .unwrap();
    runtime
        .add_device(DeviceSpec::new(&port, "b_good", BankCounts::new(1, 1, 1, 1), ScriptSources::File(good_script)))
        .unwrap();

    let summary = runtime.start_all();
    assert_eq!(summary.started, [DeviceKey::new(&port, "b_good")]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, DeviceKey::new(&port, "a_bad"));
    assert!(matches!(summary.failed[0].1, ScriptError::StartTimeout { .. }));
    assert!(runtime.is_running(&port, "b_good"));
    assert!(!runtime.is_running(&port, "a_bad"));

    // The failed device is retried rather than reported as already started.
    let again = runtime.start_all();
    assert!(again.started.is_empty());
    assert_eq!(again.failed.len(), 1);
    assert!(matches!(again.failed[0].1, ScriptError::StartTimeout { .. }));
    assert!(runtime.is_running(&port, "b_good"));

    let reports = runtime.stop_all();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].device, "b_good");
}
