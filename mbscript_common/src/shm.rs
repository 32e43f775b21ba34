//! Shared memory subsystem definitions.
//!
//! This module contains:
//! - `consts`: Region size limits, alignment and naming constants.
//! - `control`: The control block shared between host and child.
//! - `layout`: Bank sizing and region offset arithmetic.

pub mod consts;
pub mod control;
pub mod layout;
