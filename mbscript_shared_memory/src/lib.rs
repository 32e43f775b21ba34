//! # mbscript Shared Memory Channel
//!
//! The region shared between the Modbus simulator host and one script
//! interpreter process: a control block followed by mirrors of the four
//! Modbus banks.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────────────┐    ┌─────────────────┐
//! │   Host          │    │  <ns>.<port>.<dev>.control│    │   Script child  │
//! │                 │    │                          │    │                 │
//! │ ScriptChannel   ├───►│ [Control|0x|1x|3x|4x]    │◄───┤ ScriptChannel   │
//! │   ::open        │    │ flock: one SH per handle │    │   ::attach      │
//! └─────────────────┘    └──────────────────────────┘    └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mbscript_common::shm::layout::{BankCounts, BankKind, RegionLayout};
//! use mbscript_shared_memory::{ChannelName, ChannelResult, ScriptChannel};
//!
//! # fn main() -> ChannelResult<()> {
//! let counts = BankCounts::new(10, 10, 5, 20);
//! let layout = RegionLayout::new(counts)?;
//! let name = ChannelName::for_device("ModbusTools.Server", "Port1", "PLC1")?;
//!
//! let host = ScriptChannel::open(&name, layout.region_size())?;
//! host.control().host_prepare(counts);
//! host.bank(BankKind::HoldingRegisters)?.set_register(0, 42)?;
//!
//! let child = ScriptChannel::attach(&name)?;
//! assert_eq!(child.bank(BankKind::HoldingRegisters)?.register(0)?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use mbscript_shared_memory::{ChannelError, ChannelName, ScriptChannel};
//!
//! # let name = ChannelName::parse("missing.control").unwrap();
//! match ScriptChannel::attach(&name) {
//!     Ok(channel) => { /* use channel */ }
//!     Err(ChannelError::NotFound { name }) => {
//!         eprintln!("Channel '{}' not found - is the host running?", name);
//!     }
//!     Err(e) => eprintln!("Unexpected error: {}", e),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! - **ScriptChannel**: `Send + Sync`; all region access is atomic
//! - **ControlView / BankView**: borrowed, `Copy`, no interior state

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bank;
pub mod channel;
pub mod control;
pub mod error;
pub mod naming;
pub mod platform;

pub use bank::BankView;
pub use channel::{ScriptChannel, validate_region_size};
pub use control::ControlView;
pub use error::{ChannelError, ChannelResult};
pub use naming::ChannelName;
pub use platform::{get_current_pid, is_process_alive, shm_dir};

/// Initialize tracing for tools and tests that use the channel standalone
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
