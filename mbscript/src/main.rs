//! # mbscript Binary
//!
//! Runs one device script against a fresh shared memory channel until
//! Ctrl-C, then stops it and prints the stop report.
//!
//! # Usage
//!
//! ```bash
//! # Ready-made script
//! mbscript --port Port1 --device PLC1 --counts 10,10,5,20 --script plc1.py
//!
//! # Program generated from init/loop/final sections
//! mbscript --device PLC1 --init init.py --loop loop.py --final final.py
//!
//! # Config file, verbose JSON logs
//! mbscript --config mbscript.toml --device PLC1 --script plc1.py -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use mbscript::{
    BridgeConfig, DeviceSpec, HostContext, ProgramSources, ScriptSession, ScriptSources,
    SessionEvent, StopReport,
};
use mbscript_common::config::{ConfigLoader, LogLevel};
use mbscript_common::shm::layout::BankCounts;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// mbscript - run a device script against the simulator's shared memory
#[derive(Parser, Debug)]
#[command(name = "mbscript")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Script execution bridge for the Modbus device simulator")]
#[command(long_about = None)]
struct Args {
    /// Path to the bridge configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port name used in the channel name
    #[arg(long, default_value = "Port1")]
    port: String,

    /// Device name used in the channel name
    #[arg(long)]
    device: String,

    /// Bank sizes as 0x,1x,3x,4x
    #[arg(long, value_parser = parse_counts, default_value = "0,0,0,0")]
    counts: BankCounts,

    /// Script file passed to the interpreter as is
    #[arg(long, value_name = "FILE", conflicts_with_all = ["init", "loop_body", "final_body"])]
    script: Option<PathBuf>,

    /// Init section source file
    #[arg(long, value_name = "FILE")]
    init: Option<PathBuf>,

    /// Loop section source file
    #[arg(long = "loop", value_name = "FILE")]
    loop_body: Option<PathBuf>,

    /// Final section source file
    #[arg(long = "final", value_name = "FILE")]
    final_body: Option<PathBuf>,

    /// Interpreter executable, overrides the configured search
    #[arg(long, value_name = "PATH")]
    interpreter: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and the stop report in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("mbscript failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    setup_tracing(&args, config.shared.log_level);
    config.validate()?;
    if let Some(interpreter) = &args.interpreter {
        config.interpreter.executable = Some(interpreter.clone());
    }

    info!("mbscript v{} starting...", env!("CARGO_PKG_VERSION"));

    let sources = script_sources(&args)?;
    let project_dir = std::env::current_dir()?;
    let (ctx, events) = HostContext::new(config.channel.namespace.clone(), vec![project_dir]);
    let device = DeviceSpec::new(args.port.clone(), args.device.clone(), args.counts, sources);
    let mut session = ScriptSession::new(ctx, device, config.session_config()?);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    session.start()?;
    info!(device = %args.device, "script running, press Ctrl-C to stop");

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(SessionEvent::Started { device, pid }) => {
                info!(%device, pid, "session started");
            }
            Ok(_) | Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    let report = session.stop()?;
    print_report(&report, args.json)?;

    info!("mbscript shutdown complete");
    Ok(())
}

/// Build the script sources from `--script` or the section files.
fn script_sources(args: &Args) -> Result<ScriptSources, Box<dyn std::error::Error>> {
    if let Some(script) = &args.script {
        return Ok(ScriptSources::File(script.clone()));
    }
    let read = |path: &Option<PathBuf>| -> std::io::Result<String> {
        path.as_deref().map(read_source).transpose().map(Option::unwrap_or_default)
    };
    let sources = ProgramSources {
        init: read(&args.init)?,
        loop_body: read(&args.loop_body)?,
        finalize: read(&args.final_body)?,
    };
    if sources.is_empty() {
        return Err("no script given: use --script or --init/--loop/--final".into());
    }
    Ok(ScriptSources::Program(sources))
}

fn read_source(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
}

/// Parse `0x,1x,3x,4x` bank counts.
fn parse_counts(s: &str) -> Result<BankCounts, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [c0, c1, c3, c4] => {
            let counts = BankCounts::new(*c0, *c1, *c3, *c4);
            counts.validate().map_err(|e| e.to_string())?;
            Ok(counts)
        }
        _ => Err(format!("expected 4 comma separated counts, got {}", parts.len())),
    }
}

fn print_report(report: &StopReport, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!(
            "device={} pid={} forced={} exit_code={} host_cycle={} script_cycle={}",
            report.device,
            report.pid,
            report.forced,
            report
                .exit_code
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
            report.heartbeat.host_cycle,
            report.heartbeat.script_cycle,
        );
    }
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::from(configured)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_parse() {
        assert_eq!(parse_counts("10,10,5,20").unwrap(), BankCounts::new(10, 10, 5, 20));
        assert_eq!(parse_counts(" 1, 2 ,3,4").unwrap(), BankCounts::new(1, 2, 3, 4));
        assert!(parse_counts("1,2,3").is_err());
        assert!(parse_counts("1,2,3,x").is_err());
        assert!(parse_counts("0,0,0,70000").is_err());
    }

    #[test]
    fn script_and_sections_conflict() {
        let result = Args::try_parse_from([
            "mbscript", "--device", "PLC1", "--script", "a.py", "--loop", "b.py",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply() {
        let args = Args::try_parse_from(["mbscript", "--device", "PLC1", "--script", "a.py"]).unwrap();
        assert_eq!(args.port, "Port1");
        assert_eq!(args.counts, BankCounts::default());
        assert!(matches!(script_sources(&args).unwrap(), ScriptSources::File(_)));
    }
}
