//! Typed access to the control block of a mapped channel.
//!
//! Host-side mutators are prefixed with their role so a reader of the call
//! site can tell who owns the field being written.

use mbscript_common::shm::control::{ControlBlock, ControlFlags};
use mbscript_common::shm::layout::{BankCounts, BankKind};
use std::sync::atomic::Ordering;

/// Borrowed view of a [`ControlBlock`] inside a channel mapping.
#[derive(Clone, Copy)]
pub struct ControlView<'a> {
    block: &'a ControlBlock,
}

impl<'a> ControlView<'a> {
    pub(crate) fn new(block: &'a ControlBlock) -> Self {
        Self { block }
    }

    /// Initialize the block before the child is spawned.
    ///
    /// Counts and the host cycle are written first, the run flag last, so a
    /// child that observes `RUNNING` also observes the counts. `script_cycle`
    /// belongs to the child and is left as found; a freshly initialized
    /// region starts it at zero.
    pub fn host_prepare(&self, counts: BankCounts) {
        for bank in BankKind::ALL {
            self.block
                .count_field(bank)
                .store(counts.get(bank), Ordering::Relaxed);
        }
        self.block.host_cycle.store(0, Ordering::Relaxed);
        self.block
            .flags
            .store(ControlFlags::RUNNING.bits(), Ordering::Release);
    }

    /// Set the run bit.
    pub fn host_set_running(&self) {
        self.block
            .flags
            .fetch_or(ControlFlags::RUNNING.bits(), Ordering::Release);
    }

    /// Clear the run bit, asking the child to finish.
    pub fn host_clear_running(&self) {
        self.block
            .flags
            .fetch_and(!ControlFlags::RUNNING.bits(), Ordering::Release);
    }

    /// Advance the host cycle, returning the new value.
    pub fn host_bump_cycle(&self) -> u32 {
        self.block
            .host_cycle
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    /// Advance the script cycle, returning the new value. Child side only.
    pub fn script_bump_cycle(&self) -> u32 {
        self.block
            .script_cycle
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    /// Current flags.
    pub fn flags(&self) -> ControlFlags {
        ControlFlags::from_bits_truncate(self.block.flags.load(Ordering::Acquire))
    }

    /// `true` while the run bit is set.
    pub fn is_running(&self) -> bool {
        self.flags().contains(ControlFlags::RUNNING)
    }

    /// Host loop counter.
    pub fn host_cycle(&self) -> u32 {
        self.block.host_cycle.load(Ordering::Acquire)
    }

    /// Child loop counter.
    pub fn script_cycle(&self) -> u32 {
        self.block.script_cycle.load(Ordering::Acquire)
    }

    /// Bank sizes as published by the host.
    pub fn counts(&self) -> BankCounts {
        BankCounts::new(
            self.block.count0x.load(Ordering::Acquire),
            self.block.count1x.load(Ordering::Acquire),
            self.block.count3x.load(Ordering::Acquire),
            self.block.count4x.load(Ordering::Acquire),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn zeroed() -> ControlBlock {
        ControlBlock {
            flags: AtomicU32::new(0),
            count0x: AtomicU32::new(0),
            count1x: AtomicU32::new(0),
            count3x: AtomicU32::new(0),
            count4x: AtomicU32::new(0),
            host_cycle: AtomicU32::new(7),
            script_cycle: AtomicU32::new(9),
        }
    }

    #[test]
    fn prepare_publishes_counts_and_run_flag() {
        let block = zeroed();
        let view = ControlView::new(&block);
        view.host_prepare(BankCounts::new(10, 10, 5, 20));

        assert_eq!(view.counts(), BankCounts::new(10, 10, 5, 20));
        assert_eq!(view.host_cycle(), 0);
        assert_eq!(view.script_cycle(), 9, "child-owned counter untouched");
        assert!(view.is_running());
    }

    #[test]
    fn clear_running_only_touches_bit_zero() {
        let block = zeroed();
        block.flags.store(0xF0 | 1, Ordering::Relaxed);
        let view = ControlView::new(&block);

        view.host_clear_running();
        assert!(!view.is_running());
        assert_eq!(block.flags.load(Ordering::Relaxed), 0xF0);

        view.host_set_running();
        assert!(view.is_running());
    }

    #[test]
    fn cycles_wrap() {
        let block = zeroed();
        block.host_cycle.store(u32::MAX, Ordering::Relaxed);
        let view = ControlView::new(&block);
        assert_eq!(view.host_bump_cycle(), 0);
        assert_eq!(view.host_bump_cycle(), 1);
        assert_eq!(view.script_bump_cycle(), 10);
    }
}
