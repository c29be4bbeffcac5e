//! Page-backed growable byte storage.
//!
//! An [`Arena`] maps whole OS pages straight from the virtual memory API
//! (`mmap` on Unix, `VirtualAlloc` on Windows). Capacity is always a whole
//! number of pages and never shrinks. Growing maps a fresh region, copies the
//! old one across and releases the old mapping before returning.

use std::io;
use std::ptr::NonNull;
use std::sync::OnceLock;

use sockstream_transport::ByteContainer;
use tracing::debug;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// The OS virtual memory page size, queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size)
        .ok()
        .filter(|size| *size > 0)
        .unwrap_or(FALLBACK_PAGE_SIZE)
}

#[cfg(windows)]
fn query_page_size() -> usize {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    // SAFETY: SYSTEM_INFO is plain data and GetSystemInfo fills every field.
    let info = unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    match info.dwPageSize as usize {
        0 => FALLBACK_PAGE_SIZE,
        size => size,
    }
}

/// Round `required` up to a whole number of pages (at least one).
pub fn round_to_pages(required: usize) -> io::Result<usize> {
    let page = page_size();
    required
        .div_ceil(page)
        .max(1)
        .checked_mul(page)
        .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "arena size overflows usize"))
}

#[cfg(test)]
thread_local! {
    /// Mappings made and released on this thread.
    static MAPPINGS: std::cell::Cell<(usize, usize)> = const { std::cell::Cell::new((0, 0)) };
}

#[cfg(test)]
fn count_mapping(mapped: usize, released: usize) {
    MAPPINGS.with(|m| {
        let (total_mapped, total_released) = m.get();
        m.set((total_mapped + mapped, total_released + released));
    });
}

/// One anonymous private mapping, released on drop.
struct Pages {
    ptr: NonNull<u8>,
    len: usize,
}

impl Pages {
    fn map(len: usize) -> io::Result<Self> {
        let pages = Self::map_os(len)?;
        #[cfg(test)]
        count_mapping(1, 0);
        Ok(pages)
    }

    #[cfg(unix)]
    fn map_os(len: usize) -> io::Result<Self> {
        // SAFETY: anonymous private mapping with no address hint; the result
        // is checked against MAP_FAILED before use.
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
        NonNull::new(ptr.cast::<u8>())
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
    }

    #[cfg(windows)]
    fn map_os(len: usize) -> io::Result<Self> {
        use windows_sys::Win32::System::Memory::{
            VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
        };

        // SAFETY: fresh committed region with no address hint; null is
        // checked before use.
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        NonNull::new(ptr.cast::<u8>())
            .map(|ptr| Self { ptr, len })
            .ok_or_else(io::Error::last_os_error)
    }

    #[cfg(unix)]
    fn unmap(&mut self) {
        // SAFETY: `ptr`/`len` describe a live mapping created by `map`.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } != 0 {
            debug!(error = %io::Error::last_os_error(), "munmap failed");
        }
    }

    #[cfg(windows)]
    fn unmap(&mut self) {
        use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

        // SAFETY: `ptr` is the base of a region returned by VirtualAlloc.
        if unsafe { VirtualFree(self.ptr.as_ptr().cast(), 0, MEM_RELEASE) } == 0 {
            debug!(error = %io::Error::last_os_error(), "VirtualFree failed");
        }
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is readable for `len` bytes while `self` lives
        // and is zero-initialized by the OS.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        self.unmap();
        #[cfg(test)]
        count_mapping(0, 1);
    }
}

// SAFETY: the mapping is exclusively owned; shared access only hands out
// `&[u8]`, mutation requires `&mut`.
unsafe impl Send for Pages {}
unsafe impl Sync for Pages {}

/// Growable page-aligned byte storage.
///
/// `len` bytes are "in use" (what [`ByteContainer`] exposes); the rest of the
/// mapping up to [`capacity`](Self::capacity) is spare room reachable through
/// [`mapped_mut`](Self::mapped_mut).
pub struct Arena {
    pages: Pages,
    len: usize,
}

impl Arena {
    /// Map a single page.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(page_size())
    }

    /// Map enough pages to hold `required` bytes.
    pub fn with_capacity(required: usize) -> io::Result<Self> {
        let pages = Pages::map(round_to_pages(required)?)?;
        Ok(Self { pages, len: 0 })
    }

    /// Mapped size in bytes; always a multiple of [`page_size`].
    pub fn capacity(&self) -> usize {
        self.pages.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes in use.
    pub fn as_slice(&self) -> &[u8] {
        &self.pages.as_slice()[..self.len]
    }

    /// Bytes in use, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.pages.as_mut_slice()[..len]
    }

    /// The whole mapping, regardless of `len`.
    pub fn mapped(&self) -> &[u8] {
        self.pages.as_slice()
    }

    /// The whole mapping, mutably.
    pub fn mapped_mut(&mut self) -> &mut [u8] {
        self.pages.as_mut_slice()
    }

    /// Make sure at least `required` bytes are mapped.
    ///
    /// Growth copies the entire old mapping, so bytes past `len` survive too.
    pub fn reserve(&mut self, required: usize) -> io::Result<()> {
        if required <= self.capacity() {
            return Ok(());
        }

        let capacity = round_to_pages(required)?;
        let mut grown = Pages::map(capacity)?;
        grown.as_mut_slice()[..self.pages.len].copy_from_slice(self.pages.as_slice());
        debug!(from = self.pages.len, to = capacity, "arena grew");
        self.pages = grown;
        Ok(())
    }

    /// Set the in-use length, growing if needed. Newly exposed bytes are zeroed.
    pub fn resize(&mut self, new_len: usize) -> io::Result<()> {
        // Pages mapped by this call come zeroed from the OS.
        let reused = self.capacity();
        self.reserve(new_len)?;
        if new_len > self.len {
            let old = self.len;
            let dirty_end = new_len.min(reused);
            if old < dirty_end {
                self.pages.as_mut_slice()[old..dirty_end].fill(0);
            }
        }
        self.len = new_len;
        Ok(())
    }
}

impl ByteContainer for Arena {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }

    fn resize(&mut self, new_len: usize) -> io::Result<()> {
        Arena::resize(self, new_len)
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
