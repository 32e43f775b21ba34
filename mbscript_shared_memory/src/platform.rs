//! Platform specific backing store operations

pub mod linux;

pub use linux::*;
