//! Shared memory channel between the host and one script interpreter.
//!
//! # Ownership
//!
//! There is no explicit create or destroy step. Every handle opens the
//! backing file and holds a `flock` on it for its lifetime:
//!
//! - [`ScriptChannel::open`] tries an exclusive lock first. Getting it means
//!   nobody else holds the region, so the handle resizes and zero-fills it
//!   and then downgrades to a shared lock.
//! - Otherwise the handle waits for a shared lock and attaches to the region
//!   as it is.
//! - On drop a handle tries to upgrade back to exclusive. The handle that
//!   succeeds is the last one and unlinks the backing file.
//!
//! Two handles dropped at the same instant may both fail the upgrade and
//! leave the file behind. The next `open` finds no holder and re-zeroes it.

use crate::bank::BankView;
use crate::control::ControlView;
use crate::error::{ChannelError, ChannelResult};
use crate::naming::ChannelName;
use crate::platform::{lock_shared, map_region, open_backing_file, refers_to, try_lock_exclusive};
use mbscript_common::shm::consts::{CONTROL_REGION_SIZE, SHM_MAX_SIZE, SHM_PAGE_SIZE};
use mbscript_common::shm::control::ControlBlock;
use mbscript_common::shm::layout::{BankKind, RegionLayout};
use memmap2::MmapMut;
use std::fs::File;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU8;
use tracing::{debug, trace, warn};

/// Attempts before giving up on a path that keeps getting unlinked under us.
const OPEN_ATTEMPTS: usize = 8;

/// Mapped channel region plus the lock that keeps it alive.
pub struct ScriptChannel {
    name: ChannelName,
    path: PathBuf,
    base: NonNull<u8>,
    size: usize,
    initializer: bool,
    // Drop order: the mapping goes before the file so the lock is the last
    // thing released.
    _mmap: MmapMut,
    file: File,
}

// SAFETY: the mapping is owned by the handle and every access to its bytes
// goes through atomics (`ControlBlock` fields, `AtomicU8`/`AtomicU16` bank
// cells), so sharing or moving the handle across threads cannot race.
unsafe impl Send for ScriptChannel {}
unsafe impl Sync for ScriptChannel {}

impl ScriptChannel {
    /// Create-or-attach the region named `name` with `size` bytes.
    pub fn open(name: &ChannelName, size: usize) -> ChannelResult<Self> {
        validate_region_size(size)?;
        let path = name.path();

        for _ in 0..OPEN_ATTEMPTS {
            let file = open_backing_file(&path, true).map_err(|e| ChannelError::from_io(name.as_str(), e))?;

            let initializer = try_lock_exclusive(&file)?;
            if initializer {
                if !refers_to(&file, &path)? {
                    trace!(channel = %name, "backing file replaced before lock, retrying");
                    continue;
                }
                // Truncating first drops any stale contents; growing again
                // reads back as zeros.
                file.set_len(0)
                    .and_then(|()| file.set_len(size as u64))
                    .map_err(|e| ChannelError::from_io(name.as_str(), e))?;
                lock_shared(&file)?;
            } else {
                lock_shared(&file)?;
                if !refers_to(&file, &path)? {
                    trace!(channel = %name, "backing file replaced before lock, retrying");
                    continue;
                }
                let actual = file.metadata()?.len() as usize;
                if actual != size {
                    return Err(ChannelError::SizeMismatch {
                        name: name.to_string(),
                        expected: size,
                        actual,
                    });
                }
            }

            let channel = Self::map(name.clone(), path, file, size, initializer)?;
            debug!(channel = %name, size, initializer, "channel opened");
            return Ok(channel);
        }

        Err(ChannelError::Io {
            source: std::io::Error::other(format!("channel {name} kept being replaced while opening")),
        })
    }

    /// Attach to an existing region, taking its size from the backing file.
    pub fn attach(name: &ChannelName) -> ChannelResult<Self> {
        let path = name.path();

        for _ in 0..OPEN_ATTEMPTS {
            let file = open_backing_file(&path, false).map_err(|e| ChannelError::from_io(name.as_str(), e))?;
            lock_shared(&file)?;
            if !refers_to(&file, &path)? {
                continue;
            }
            let size = file.metadata()?.len() as usize;
            validate_region_size(size)?;

            let channel = Self::map(name.clone(), path, file, size, false)?;
            debug!(channel = %name, size, "channel attached");
            return Ok(channel);
        }

        Err(ChannelError::NotFound {
            name: name.to_string(),
        })
    }

    fn map(
        name: ChannelName,
        path: PathBuf,
        file: File,
        size: usize,
        initializer: bool,
    ) -> ChannelResult<Self> {
        let mut mmap = map_region(&file, size).map_err(|e| ChannelError::from_io(name.as_str(), e))?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(ChannelError::InvalidSize { size })?;
        Ok(Self {
            name,
            path,
            base,
            size,
            initializer,
            _mmap: mmap,
            file,
        })
    }

    /// Channel identity.
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Region size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// `true` if this handle found the region unheld and zero-filled it.
    pub fn is_initializer(&self) -> bool {
        self.initializer
    }

    /// Control block at the start of the region.
    pub fn control(&self) -> ControlView<'_> {
        // SAFETY: the mapping is page aligned and at least one page long, and
        // ControlBlock is made of AtomicU32 fields valid for any bit pattern.
        ControlView::new(unsafe { &*self.base.as_ptr().cast::<ControlBlock>() })
    }

    /// Layout derived from the counts currently in the control block.
    pub fn layout(&self) -> ChannelResult<RegionLayout> {
        let layout = RegionLayout::new(self.control().counts())?;
        if layout.region_size() > self.size {
            return Err(ChannelError::InvalidSize {
                size: layout.region_size(),
            });
        }
        Ok(layout)
    }

    /// View of one bank, placed according to the published counts.
    pub fn bank(&self, kind: BankKind) -> ChannelResult<BankView<'_>> {
        let layout = self.layout()?;
        Ok(BankView::new(kind, self.region(), layout.span(kind)))
    }

    fn region(&self) -> &[AtomicU8] {
        // SAFETY: `base` points at `size` mapped bytes that live as long as
        // `self`; AtomicU8 has the layout of u8.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().cast::<AtomicU8>(), self.size) }
    }
}

impl std::fmt::Debug for ScriptChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptChannel")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("initializer", &self.initializer)
            .finish()
    }
}

impl Drop for ScriptChannel {
    fn drop(&mut self) {
        match try_lock_exclusive(&self.file) {
            Ok(true) => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(channel = %self.name, error = %e, "failed to unlink channel");
                    }
                } else {
                    debug!(channel = %self.name, "last handle released, channel unlinked");
                }
            }
            Ok(false) => trace!(channel = %self.name, "channel still held elsewhere"),
            Err(e) => warn!(channel = %self.name, error = %e, "lock upgrade failed on drop"),
        }
    }
}

/// Validate a region size: one page to 1 GiB, page aligned.
pub fn validate_region_size(size: usize) -> ChannelResult<()> {
    if size < CONTROL_REGION_SIZE.max(SHM_PAGE_SIZE) || size > SHM_MAX_SIZE || size % SHM_PAGE_SIZE != 0 {
        return Err(ChannelError::InvalidSize { size });
    }
    Ok(())
}
