//! mbscript Common Library
//!
//! Shared definitions for every crate in the mbscript workspace: the binary
//! layout of the control block and bank mirrors exchanged with the script
//! interpreter, system-wide constants, configuration loading and the
//! session/health vocabulary used by the bridge.
//!
//! # Module Structure
//!
//! - [`shm`] - Control block layout, bank layout arithmetic and shm constants
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Timing defaults and fixed labels
//! - [`health`] - Session status and liveness types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use mbscript_common::shm::layout::{BankCounts, RegionLayout};
//!
//! let layout = RegionLayout::new(BankCounts::new(10, 10, 5, 20)).unwrap();
//! assert_eq!(layout.region_size(), 4096);
//! ```

pub mod config;
pub mod consts;
pub mod health;
pub mod prelude;
pub mod shm;
