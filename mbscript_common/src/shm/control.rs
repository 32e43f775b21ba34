//! Control block shared between the host and the script interpreter.
//!
//! The block sits at offset 0 of every channel region. It is packed,
//! native byte order, 28 bytes:
//!
//! | Offset | Field        | Writer |
//! |--------|--------------|--------|
//! | 0      | flags        | host   |
//! | 4      | count0x      | host   |
//! | 8      | count1x      | host   |
//! | 12     | count3x      | host   |
//! | 16     | count4x      | host   |
//! | 20     | host_cycle   | host   |
//! | 24     | script_cycle | child  |
//!
//! ## Ownership Protocol
//!
//! No lock protects the block. Each field has exactly one writer for the
//! lifetime of a session and every field is a naturally aligned 32-bit word,
//! accessed through `AtomicU32` so loads and stores are single operations on
//! every target. `AtomicU32` has the same size and alignment as `u32`, so the
//! struct below is bit-compatible with the plain C layout the interpreter
//! side maps.

use bitflags::bitflags;
use core::mem::{align_of, offset_of, size_of};
use core::sync::atomic::AtomicU32;
use static_assertions::const_assert_eq;

use super::layout::BankKind;

bitflags! {
    /// Bits of [`ControlBlock::flags`]. Written by the host only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlFlags: u32 {
        /// Session active; the child loops while this bit is set.
        const RUNNING = 0x0000_0001;
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Control block laid over the first bytes of a channel region.
#[derive(Debug)]
#[repr(C)]
pub struct ControlBlock {
    /// [`ControlFlags`] bits.
    pub flags: AtomicU32,
    /// Coil count (0x bank).
    pub count0x: AtomicU32,
    /// Discrete input count (1x bank).
    pub count1x: AtomicU32,
    /// Input register count (3x bank).
    pub count3x: AtomicU32,
    /// Holding register count (4x bank).
    pub count4x: AtomicU32,
    /// Host loop tick counter, wrapping.
    pub host_cycle: AtomicU32,
    /// Child loop iteration counter, wrapping.
    pub script_cycle: AtomicU32,
}

/// Size of the control block in bytes.
pub const CONTROL_BLOCK_SIZE: usize = size_of::<ControlBlock>();

const_assert_eq!(CONTROL_BLOCK_SIZE, 28);
const_assert_eq!(align_of::<ControlBlock>(), 4);
const_assert_eq!(size_of::<AtomicU32>(), size_of::<u32>());
const_assert_eq!(offset_of!(ControlBlock, flags), 0);
const_assert_eq!(offset_of!(ControlBlock, count0x), 4);
const_assert_eq!(offset_of!(ControlBlock, count1x), 8);
const_assert_eq!(offset_of!(ControlBlock, count3x), 12);
const_assert_eq!(offset_of!(ControlBlock, count4x), 16);
const_assert_eq!(offset_of!(ControlBlock, host_cycle), 20);
const_assert_eq!(offset_of!(ControlBlock, script_cycle), 24);

impl ControlBlock {
    /// Element count field for `bank`.
    #[inline]
    pub const fn count_field(&self, bank: BankKind) -> &AtomicU32 {
        match bank {
            BankKind::Coils => &self.count0x,
            BankKind::DiscreteInputs => &self.count1x,
            BankKind::InputRegisters => &self.count3x,
            BankKind::HoldingRegisters => &self.count4x,
        }
    }
}

/// Compare two wrapping cycle samples.
///
/// Returns `true` if `later` is at or after `earlier`, treating the counter
/// as a 32-bit ring: a forward distance under half the ring counts as
/// progress.
#[inline]
pub const fn cycle_not_before(earlier: u32, later: u32) -> bool {
    later.wrapping_sub(earlier) < 0x8000_0000
}
