//! # mbscript Script Bridge
//!
//! Runs a device's script in an external interpreter process and connects
//! it to the simulator through a shared memory channel.
//!
//! ## Session Lifecycle
//!
//! ```text
//!  start()                                                stop()
//!    │                                                      │
//!    ▼                                                      ▼
//! open channel ─► host_prepare ─► spawn ─► wait running ─► loop ─► clear run bit
//!                 (counts, RUNNING)        (script_cycle≠0)  │      wait / kill
//!                                                            │
//!                                      relay drain, host_cycle++, sleep(tick)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mbscript::{DeviceSpec, HostContext, ScriptSession, ScriptSources, SessionConfig};
//! use mbscript_common::shm::layout::BankCounts;
//!
//! # fn main() -> mbscript::ScriptResult<()> {
//! let (ctx, events) = HostContext::new("ModbusTools.Server", vec!["/srv/project".into()]);
//! let device = DeviceSpec::new(
//!     "Port1",
//!     "PLC1",
//!     BankCounts::new(10, 10, 5, 20),
//!     ScriptSources::File("plc1.py".into()),
//! );
//! let mut session = ScriptSession::new(ctx, device, SessionConfig::new("/usr/bin/python3"));
//!
//! session.start()?;
//! for event in events.try_iter() {
//!     println!("{event:?}");
//! }
//! let report = session.stop()?;
//! println!("forced: {}", report.forced);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod interpreter;
pub mod program;
pub mod relay;
pub mod runtime;
pub mod session;
pub mod supervisor;

pub use config::{BridgeConfig, SessionConfig};
pub use error::{ScriptError, ScriptResult};
pub use event::{LogLine, SessionEvent};
pub use heartbeat::{Heartbeat, LivenessProbe};
pub use program::{ProgramSources, ProgramTemplate, ScriptSources, compose_import_path};
pub use runtime::{DeviceKey, ScriptRuntime, StartSummary};
pub use session::{DeviceSpec, HostContext, ScriptSession, StopReport};
pub use supervisor::ProcessSupervisor;
