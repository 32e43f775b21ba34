//! SHM (Shared Memory) constants.
//!
//! These constants define the fundamental parameters of the script channel.
//! They are the single source of truth - the host, the reference child and
//! any interpreter-side binding must agree on them.

/// Page size used as the allocation granule of a channel region.
///
/// Region sizes are rounded up to a multiple of this value.
pub const SHM_PAGE_SIZE: usize = 4096;

/// Minimum shared memory region size in bytes (one page).
pub const SHM_MIN_SIZE: usize = SHM_PAGE_SIZE;

/// Maximum shared memory region size in bytes.
pub const SHM_MAX_SIZE: usize = 1_073_741_824; // 1GB

/// CPU cache line size in bytes.
///
/// The control block occupies the first cache line of the region so the
/// bank mirrors never share a line with the cycle counters.
pub const CACHE_LINE_SIZE: usize = 64;

/// Bytes reserved at the start of the region for the control block.
pub const CONTROL_REGION_SIZE: usize = CACHE_LINE_SIZE;

/// Alignment of every bank mirror inside the region.
pub const BANK_ALIGN: usize = 8;

/// Maximum element count of a single bank (the Modbus address space).
pub const MAX_BANK_COUNT: u32 = 65_536;

/// Default application namespace used as the channel name prefix.
pub const DEFAULT_NAMESPACE: &str = "ModbusTools.Server";

/// Suffix of the control channel name.
pub const CHANNEL_SUFFIX: &str = "control";

/// Directory hosting POSIX shared memory objects on Linux.
pub const SHM_DIR: &str = "/dev/shm";
