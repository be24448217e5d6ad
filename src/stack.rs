//! Page-aligned stack mappings with an optional guard page, and a
//! head-only recycling freelist.

use std::io;
use std::ptr;
use std::sync::OnceLock;

use crate::error::Error;

fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

/// Rounds `stack_size` up to a whole number of pages, adds one page for the
/// co-located [`crate::strand::StrandInner`] header, and one more if `protect`
/// is set.
pub fn map_size_for(stack_size: u32, protect: bool) -> usize {
    let page = page_size();
    let stack_size = stack_size as usize;
    let mut size = stack_size.div_ceil(page) * page + page;
    if protect {
        size += page;
    }
    size
}

/// A single contiguous anonymous mapping: `[guard page?][stack][header page]`.
#[derive(Debug)]
pub struct StackMap {
    pub base: *mut u8,
    pub size: usize,
    pub protected: bool,
}

impl StackMap {
    /// Obtains a fresh private anonymous mapping of `size` bytes. If
    /// `protect` is set, the lowest page is made inaccessible before the
    /// mapping is handed back, so a downward overflow faults there instead
    /// of silently corrupting whatever memory follows.
    pub fn alloc(size: usize, protect: bool) -> Result<StackMap, Error> {
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            let source = io::Error::last_os_error();
            log::warn!("stack mapping of {size} bytes failed: {source}");
            return Err(Error::Map { size, source });
        }
        let base = base.cast::<u8>();

        if protect {
            let rc = unsafe { libc::mprotect(base.cast(), page_size(), libc::PROT_NONE) };
            if rc < 0 {
                let source = io::Error::last_os_error();
                log::warn!("guard page protection failed: {source}");
                unsafe { libc::munmap(base.cast(), size) };
                return Err(Error::Protect { source });
            }
        }

        log::trace!("mapped {size} byte stack at {base:p} (protect={protect})");
        Ok(StackMap { base, size, protected: protect })
    }

    /// Returns the mapping to the OS.
    pub fn free(self) {
        log::trace!("unmapping {} byte stack at {:p}", self.size, self.base);
        unsafe { libc::munmap(self.base.cast(), self.size) };
    }

    /// Installs the no-access guard page on a mapping that doesn't already
    /// have one. Used when a recycled mapping that was never protected is
    /// about to back a strand created with `Flags::PROTECT` -- the original's
    /// `new()` re-checks this on every reuse rather than assuming a
    /// recycled region's protection matches the new request.
    pub fn protect_guard(&mut self) -> Result<(), Error> {
        let rc = unsafe { libc::mprotect(self.base.cast(), page_size(), libc::PROT_NONE) };
        if rc < 0 {
            let source = io::Error::last_os_error();
            log::warn!("guard page protection of recycled mapping failed: {source}");
            return Err(Error::Protect { source });
        }
        self.protected = true;
        Ok(())
    }
}

/// Consults only `retired`, detaching and returning it if it is large
/// enough; if it is too small it is unmapped and `None` is returned either
/// way. Never walks past the head: strand creation must stay O(1).
pub fn recycle(retired: Option<StackMap>, min_size: usize) -> Option<StackMap> {
    let map = retired?;
    if map.size < min_size {
        log::debug!(
            "dead-list head too small ({} < {min_size}), unmapping",
            map.size
        );
        map.free();
        None
    } else {
        log::debug!("reusing dead-list head mapping of {} bytes", map.size);
        Some(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_roundtrips() {
        let size = map_size_for(16 * 1024, false);
        let map = StackMap::alloc(size, false).unwrap();
        assert_eq!(map.size, size);
        assert!(!map.base.is_null());
        map.free();
    }

    #[test]
    fn protected_mapping_has_inaccessible_guard_page() {
        let size = map_size_for(16 * 1024, true);
        let map = StackMap::alloc(size, true).unwrap();
        assert!(map.protected);
        map.free();
    }

    #[test]
    fn recycle_rejects_undersized_mapping() {
        let small = StackMap::alloc(map_size_for(16 * 1024, false), false).unwrap();
        let recycled = recycle(Some(small), map_size_for(1024 * 1024, false));
        assert!(recycled.is_none());
    }

    #[test]
    fn recycle_accepts_sufficiently_large_mapping() {
        let size = map_size_for(64 * 1024, false);
        let big = StackMap::alloc(size, false).unwrap();
        let recycled = recycle(Some(big), map_size_for(16 * 1024, false)).unwrap();
        assert_eq!(recycled.size, size);
        recycled.free();
    }

    #[test]
    fn map_size_accounts_for_header_and_guard_pages() {
        let plain = map_size_for(16 * 1024, false);
        let guarded = map_size_for(16 * 1024, true);
        assert_eq!(guarded - plain, page_size());
    }
}
