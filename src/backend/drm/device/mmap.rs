use std::io;
use std::os::unix::io::BorrowedFd;
use std::ptr::{self, NonNull};
use std::slice;

use rustix::mm::{self, MapFlags, ProtFlags};
use tracing::{trace, warn};

/// Shared read/write mapping of a dumb buffer
///
/// The mapping stays valid until dropped, independently of the framebuffer or
/// allocation it was created for.
#[derive(Debug)]
pub struct MemMap {
    ptr: NonNull<u8>,
    len: usize,
}

impl MemMap {
    pub(super) fn new(fd: BorrowedFd<'_>, len: usize, offset: u64) -> io::Result<MemMap> {
        // SAFETY: we request a fresh mapping at a kernel chosen address,
        // nothing else can alias it.
        let ptr = unsafe {
            mm::mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                offset,
            )?
        };
        trace!(len, offset, "Mapped dumb buffer");
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))?;
        Ok(MemMap { ptr, len })
    }
}

impl AsRef<[u8]> for MemMap {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the mapping is readable and lives as long as `self`
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[u8]> for MemMap {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is writable and the borrow checker guarantees exclusive access
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MemMap {
    fn drop(&mut self) {
        // SAFETY: ptr and len describe a mapping created in `MemMap::new`
        if let Err(err) = unsafe { mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!(?err, "Failed to unmap dumb buffer");
        }
    }
}
