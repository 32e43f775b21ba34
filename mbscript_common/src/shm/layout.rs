//! Bank sizing and region layout arithmetic.
//!
//! A channel region is the control block followed by the four bank mirrors:
//!
//! ```text
//! 0        64             64+a           64+a+b   ...            size
//! ┌────────┬──────────────┬──────────────┬────────┬─────────┬────┐
//! │control │ 0x coils     │ 1x discrete  │ 3x in  │ 4x hold │pad │
//! │ block  │ ceil(n/8) B  │ ceil(n/8) B  │ 2n B   │ 2n B    │    │
//! └────────┴──────────────┴──────────────┴────────┴─────────┴────┘
//! ```
//!
//! Every bank starts on a [`BANK_ALIGN`] boundary and the total is rounded
//! up to [`SHM_PAGE_SIZE`]. Both sides derive the layout from the counts
//! stored in the control block, so no layout table travels over the channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::consts::{BANK_ALIGN, CONTROL_REGION_SIZE, MAX_BANK_COUNT, SHM_MAX_SIZE, SHM_PAGE_SIZE};

/// The four device memory banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BankKind {
    /// 0x: coils, one bit per element.
    Coils,
    /// 1x: discrete inputs, one bit per element.
    DiscreteInputs,
    /// 3x: input registers, 16 bits per element.
    InputRegisters,
    /// 4x: holding registers, 16 bits per element.
    HoldingRegisters,
}

impl BankKind {
    /// All banks in region order.
    pub const ALL: [Self; 4] = [
        Self::Coils,
        Self::DiscreteInputs,
        Self::InputRegisters,
        Self::HoldingRegisters,
    ];

    /// Modbus reference prefix (`"0x"`, `"1x"`, `"3x"`, `"4x"`).
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Coils => "0x",
            Self::DiscreteInputs => "1x",
            Self::InputRegisters => "3x",
            Self::HoldingRegisters => "4x",
        }
    }

    /// Position of the bank in region order.
    pub const fn index(self) -> usize {
        match self {
            Self::Coils => 0,
            Self::DiscreteInputs => 1,
            Self::InputRegisters => 2,
            Self::HoldingRegisters => 3,
        }
    }

    /// `true` for the bit-packed banks (0x, 1x).
    pub const fn is_bit_bank(self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }

    /// Bytes needed to hold `count` elements of this bank.
    pub const fn byte_len(self, count: u32) -> usize {
        if self.is_bit_bank() {
            (count as usize).div_ceil(8)
        } else {
            count as usize * 2
        }
    }
}

/// Per-bank element counts of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BankCounts {
    /// 0x element count.
    pub coils: u32,
    /// 1x element count.
    pub discrete_inputs: u32,
    /// 3x element count.
    pub input_registers: u32,
    /// 4x element count.
    pub holding_registers: u32,
}

impl BankCounts {
    /// Counts in 0x, 1x, 3x, 4x order.
    pub const fn new(coils: u32, discrete_inputs: u32, input_registers: u32, holding_registers: u32) -> Self {
        Self {
            coils,
            discrete_inputs,
            input_registers,
            holding_registers,
        }
    }

    /// Element count of `bank`.
    pub const fn get(&self, bank: BankKind) -> u32 {
        match bank {
            BankKind::Coils => self.coils,
            BankKind::DiscreteInputs => self.discrete_inputs,
            BankKind::InputRegisters => self.input_registers,
            BankKind::HoldingRegisters => self.holding_registers,
        }
    }

    /// Check every count against [`MAX_BANK_COUNT`].
    pub fn validate(&self) -> Result<(), LayoutError> {
        for bank in BankKind::ALL {
            let count = self.get(bank);
            if count > MAX_BANK_COUNT {
                return Err(LayoutError::BankTooLarge { bank, count });
            }
        }
        Ok(())
    }
}

/// Errors produced while computing a region layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// A bank count exceeds the Modbus address space.
    #[error("{} bank count {count} exceeds {}", .bank.prefix(), MAX_BANK_COUNT)]
    BankTooLarge {
        /// Offending bank.
        bank: BankKind,
        /// Requested element count.
        count: u32,
    },

    /// The region would exceed [`SHM_MAX_SIZE`].
    #[error("region of {size} bytes exceeds the {} byte limit", SHM_MAX_SIZE)]
    RegionTooLarge {
        /// Computed region size.
        size: usize,
    },
}

/// Byte span of one bank inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankSpan {
    /// Offset from the start of the region.
    pub offset: usize,
    /// Used bytes (without alignment padding).
    pub len: usize,
    /// Element count.
    pub count: u32,
}

/// Complete region layout for a set of bank counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    counts: BankCounts,
    spans: [BankSpan; 4],
    region_size: usize,
}

impl RegionLayout {
    /// Compute the layout for `counts`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError`] if a count is out of range or the region would
    /// exceed [`SHM_MAX_SIZE`].
    pub fn new(counts: BankCounts) -> Result<Self, LayoutError> {
        counts.validate()?;

        let mut spans = [BankSpan {
            offset: 0,
            len: 0,
            count: 0,
        }; 4];
        let mut offset = CONTROL_REGION_SIZE;
        for bank in BankKind::ALL {
            let count = counts.get(bank);
            let len = bank.byte_len(count);
            spans[bank.index()] = BankSpan { offset, len, count };
            offset += align_up(len, BANK_ALIGN);
        }

        let region_size = align_up(offset, SHM_PAGE_SIZE);
        if region_size > SHM_MAX_SIZE {
            return Err(LayoutError::RegionTooLarge { size: region_size });
        }

        Ok(Self {
            counts,
            spans,
            region_size,
        })
    }

    /// Counts the layout was computed from.
    pub const fn counts(&self) -> BankCounts {
        self.counts
    }

    /// Span of `bank`.
    pub const fn span(&self, bank: BankKind) -> BankSpan {
        self.spans[bank.index()]
    }

    /// Total page-aligned region size in bytes.
    pub const fn region_size(&self) -> usize {
        self.region_size
    }
}

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
