//! Bounds-checked access to the Modbus bank mirrors.
//!
//! Every access goes through an atomic of the element's width so the host
//! and the child can touch the same bank without a lock. Bit banks pack
//! element `i` into bit `i % 8` of byte `i / 8`; register banks hold native
//! byte order `u16` words.

use crate::error::{ChannelError, ChannelResult};
use mbscript_common::shm::layout::{BankKind, BankSpan};
use std::sync::atomic::{AtomicU8, AtomicU16, Ordering};

/// Borrowed view of one bank inside a channel mapping.
#[derive(Clone, Copy)]
pub struct BankView<'a> {
    kind: BankKind,
    bytes: &'a [AtomicU8],
    count: u32,
}

impl<'a> BankView<'a> {
    /// `region` is the whole mapping; `span` must lie inside it.
    pub(crate) fn new(kind: BankKind, region: &'a [AtomicU8], span: BankSpan) -> Self {
        let bytes = &region[span.offset..span.offset + kind.byte_len(span.count)];
        Self {
            kind,
            bytes,
            count: span.count,
        }
    }

    /// Which bank this is.
    pub fn kind(&self) -> BankKind {
        self.kind
    }

    /// Number of elements.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Size of the bank in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Copy bytes out of the bank starting at `offset`.
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) -> ChannelResult<()> {
        let src = self.byte_range(offset, out.len())?;
        for (dst, cell) in out.iter_mut().zip(src) {
            *dst = cell.load(Ordering::Acquire);
        }
        Ok(())
    }

    /// Copy bytes into the bank starting at `offset`.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> ChannelResult<()> {
        let dst = self.byte_range(offset, data.len())?;
        for (cell, byte) in dst.iter().zip(data) {
            cell.store(*byte, Ordering::Release);
        }
        Ok(())
    }

    /// Read coil or discrete input `index`.
    pub fn bit(&self, index: usize) -> ChannelResult<bool> {
        let (cell, mask) = self.bit_cell(index, "bit read")?;
        Ok(cell.load(Ordering::Acquire) & mask != 0)
    }

    /// Write coil or discrete input `index`.
    pub fn set_bit(&self, index: usize, value: bool) -> ChannelResult<()> {
        let (cell, mask) = self.bit_cell(index, "bit write")?;
        if value {
            cell.fetch_or(mask, Ordering::AcqRel);
        } else {
            cell.fetch_and(!mask, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Read register `index`.
    pub fn register(&self, index: usize) -> ChannelResult<u16> {
        Ok(self.register_cell(index, "register read")?.load(Ordering::Acquire))
    }

    /// Write register `index`.
    pub fn set_register(&self, index: usize, value: u16) -> ChannelResult<()> {
        self.register_cell(index, "register write")?
            .store(value, Ordering::Release);
        Ok(())
    }

    fn byte_range(&self, offset: usize, len: usize) -> ChannelResult<&'a [AtomicU8]> {
        let end = offset.checked_add(len).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => Ok(&self.bytes[offset..end]),
            None => Err(ChannelError::OutOfRange {
                bank: self.kind,
                index: offset.saturating_add(len),
                count: self.bytes.len(),
            }),
        }
    }

    fn check_index(&self, index: usize) -> ChannelResult<()> {
        if index >= self.count as usize {
            return Err(ChannelError::OutOfRange {
                bank: self.kind,
                index,
                count: self.count as usize,
            });
        }
        Ok(())
    }

    fn bit_cell(&self, index: usize, op: &'static str) -> ChannelResult<(&'a AtomicU8, u8)> {
        if !self.kind.is_bit_bank() {
            return Err(ChannelError::WrongBank { bank: self.kind, op });
        }
        self.check_index(index)?;
        Ok((&self.bytes[index / 8], 1u8 << (index % 8)))
    }

    fn register_cell(&self, index: usize, op: &'static str) -> ChannelResult<&'a AtomicU16> {
        if self.kind.is_bit_bank() {
            return Err(ChannelError::WrongBank { bank: self.kind, op });
        }
        self.check_index(index)?;
        let cell = &self.bytes[index * 2];
        // SAFETY: banks start 8-byte aligned and `index * 2 + 1` is inside the
        // bank, so the two bytes form an aligned u16 cell. AtomicU16 has the
        // layout of u16 and every access to the region is atomic.
        Ok(unsafe { &*(cell as *const AtomicU8).cast::<AtomicU16>() })
    }
}
