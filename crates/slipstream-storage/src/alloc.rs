//! Disk Pre-Allocation
//!
//! Best-effort reservation of disk space when a slice file is first created,
//! so a nearly-full volume fails fast instead of mid-write. Allocation
//! failure is logged by the caller and never fatal - the writer proceeds
//! without the reservation.

use std::io;

use crate::chain::ChainFile;

pub trait Allocator: Send + Sync {
    /// Reserve `size` bytes for the file. Returns `Ok(true)` when space was
    /// actually reserved, `Ok(false)` when the platform or file does not
    /// support it.
    fn allocate(&self, file: &dyn ChainFile, size: u64) -> io::Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

impl Allocator for DefaultAllocator {
    #[cfg(target_os = "linux")]
    fn allocate(&self, file: &dyn ChainFile, size: u64) -> io::Result<bool> {
        let Some(fd) = file.raw_fd() else {
            return Ok(false);
        };

        // KEEP_SIZE: reserve blocks without extending the visible file size,
        // appends still land at the real end of data.
        let ret = unsafe { libc::fallocate(fd, libc::FALLOC_FL_KEEP_SIZE, 0, size as libc::off_t) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(true)
    }

    #[cfg(not(target_os = "linux"))]
    fn allocate(&self, _file: &dyn ChainFile, _size: u64) -> io::Result<bool> {
        Ok(false)
    }
}
