//! Startup copy of header + file into page-aligned anonymous memory.

use crate::error::ServeError;
use crate::payload::Payload;
use std::io;

/// Private anonymous mapping. Once its pages have been gifted to pipes the
/// server never writes to it again; it is only unmapped on drop.
#[derive(Debug)]
pub(crate) struct Region {
    ptr: *mut libc::c_void,
    len: usize,
}

// SAFETY: the mapping is exclusively owned and only ever read after preload.
unsafe impl Send for Region {}

impl Region {
    pub(crate) fn map(len: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Region { ptr, len })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is a live mapping of len readable bytes.
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is a live, writable mapping of len bytes owned by self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr, self.len) };
    }
}

pub(crate) fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Round `len` up to whole pages (at least one).
pub(crate) fn page_round(len: usize, page: usize) -> usize {
    len.max(1).div_ceil(page) * page
}

/// Lay the full response out in a fresh region. Returns the region and the
/// number of meaningful bytes at its start.
pub(crate) fn load(payload: &Payload) -> Result<(Region, usize), ServeError> {
    let total = usize::try_from(payload.total_len()).map_err(|_| ServeError::Preload {
        op: "size",
        source: io::Error::new(io::ErrorKind::InvalidInput, "payload does not fit in memory"),
    })?;
    let mut region =
        Region::map(page_round(total, page_size())).map_err(ServeError::preload("mmap"))?;
    payload.read_into(&mut region.as_mut_slice()[..total])?;
    Ok((region, total))
}
