//! # mbscript_peer
//!
//! Reference script child. It accepts the interpreter command line
//! (`-u <script> --importpath <paths>`), echoes the script to stdout and
//! then follows the channel protocol. `MBSCRIPT_PEER_MODE` picks a
//! misbehaviour for testing the host:
//!
//! - `normal` (default): loop while the run bit is set
//! - `exit`: exit right after echoing
//! - `stubborn`: keep looping after the run bit clears
//! - `mute`: loop without advancing `script_cycle`

use clap::Parser;
use mbscript_common::consts::CHANNEL_ENV;
use mbscript_shared_memory::{ChannelName, ScriptChannel, get_current_pid, init_tracing};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const MODE_ENV: &str = "MBSCRIPT_PEER_MODE";
const TICK: Duration = Duration::from_millis(1);

#[derive(Parser, Debug)]
#[command(name = "mbscript_peer")]
#[command(about = "Reference script child for the mbscript bridge")]
struct Args {
    /// Unbuffered output (accepted for interpreter compatibility)
    #[arg(short = 'u')]
    unbuffered: bool,

    /// Script file to echo
    script: PathBuf,

    /// `;` separated import path
    #[arg(long, default_value = "")]
    importpath: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerMode {
    Normal,
    Exit,
    Stubborn,
    Mute,
}

impl FromStr for PeerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "normal" => Ok(Self::Normal),
            "exit" => Ok(Self::Exit),
            "stubborn" => Ok(Self::Stubborn),
            "mute" => Ok(Self::Mute),
            other => Err(format!("unknown {MODE_ENV} {other:?}")),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    let mode: PeerMode = std::env::var(MODE_ENV).unwrap_or_default().parse()?;
    debug!(pid = get_current_pid(), ?mode, unbuffered = args.unbuffered, "peer starting");

    for line in std::fs::read_to_string(&args.script)?.lines() {
        println!("{line}");
    }
    println!("importpath: {}", args.importpath);

    if mode == PeerMode::Exit {
        return Ok(());
    }

    let name = ChannelName::parse(&std::env::var(CHANNEL_ENV)?)?;
    let channel = ScriptChannel::attach(&name)?;
    let control = channel.control();
    let counts = control.counts();
    println!(
        "counts: {} {} {} {}",
        counts.coils, counts.discrete_inputs, counts.input_registers, counts.holding_registers
    );

    let mut iterations: u64 = 0;
    while control.is_running() || mode == PeerMode::Stubborn {
        if mode != PeerMode::Mute {
            control.script_bump_cycle();
        }
        iterations += 1;
        std::thread::sleep(TICK);
    }

    info!(iterations, "run bit cleared, peer exiting");
    println!("final");
    Ok(())
}
