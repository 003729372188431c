//! Memory backing for message pools.
//!
//! A pool owns exactly one contiguous region for its entire lifetime. On
//! Linux the preferred source is an anonymous hugepage mapping; everywhere else
//! (and whenever hugepages are not reserved on the host) we fall back to an
//! aligned heap allocation. The unsafe surface stays inside this module.

use crate::{PoolError, PoolResult};
use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};

/// Size of the hugepages requested from the kernel (2 MiB).
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Alignment used for heap-backed regions.
pub const PAGE_SIZE: usize = 4096;

/// Initial contents of a heap-backed [`DmaRegion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionInit {
    Zeroed,
    /// Skip zeroing; payload bytes are whatever the allocator returned.
    Uninitialized,
}

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Mapped(memmap2::MmapMut),
    Owned {
        ptr: NonNull<u8>,
        layout: Layout,
    },
}

impl Backing {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Mapped(map) => map.as_mut_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Mapped(map) => map.as_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }
}

/// Contiguous, aligned memory backing a message pool.
#[derive(Debug)]
pub struct DmaRegion {
    len: usize,
    alignment: usize,
    huge: bool,
    backing: Backing,
}

// SAFETY: the region exclusively owns its allocation; no thread-local state is
// involved, and shared access goes through `&self`/`&mut self` like any buffer.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    /// Allocates `len` bytes from the heap aligned to `alignment`.
    pub fn new_aligned(len: usize, alignment: usize, init: RegionInit) -> PoolResult<Self> {
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(PoolError::AllocationFailed {
                size: len,
                alignment,
            });
        }

        let layout = Layout::from_size_align(len, alignment).map_err(|_| {
            PoolError::AllocationFailed {
                size: len,
                alignment,
            }
        })?;

        let ptr = unsafe {
            // SAFETY: `layout` has a non-zero size, checked above.
            match init {
                RegionInit::Zeroed => alloc_zeroed(layout),
                RegionInit::Uninitialized => alloc(layout),
            }
        };

        let ptr = NonNull::new(ptr).ok_or(PoolError::AllocationFailed {
            size: len,
            alignment,
        })?;
        Ok(Self {
            len,
            alignment,
            huge: false,
            backing: Backing::Owned { ptr, layout },
        })
    }

    /// Maps `len` bytes (rounded up to [`HUGE_PAGE_SIZE`]) from the hugepage pool.
    ///
    /// Returns `None` when the kernel refuses the mapping, which is the normal
    /// outcome on hosts without reserved hugepages.
    #[cfg(target_os = "linux")]
    pub fn huge_pages(len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let rounded = len.checked_next_multiple_of(HUGE_PAGE_SIZE)?;
        let mut map = memmap2::MmapOptions::new()
            .len(rounded)
            .huge(None)
            .map_anon()
            .ok()?;

        unsafe {
            // SAFETY: the anonymous mapping exposes `rounded` writable bytes.
            ptr::write_bytes(map.as_mut_ptr(), 0, rounded);
        }

        Some(Self {
            len: rounded,
            alignment: HUGE_PAGE_SIZE,
            huge: true,
            backing: Backing::Mapped(map),
        })
    }

    /// Hugepages are only requested on Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn huge_pages(_len: usize) -> Option<Self> {
        None
    }

    /// Usable bytes; a hugepage mapping reports its rounded length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Whether the region is backed by hugepages.
    pub fn is_huge(&self) -> bool {
        self.huge
    }

    /// Start address, as handed to the registration call.
    pub fn as_ptr(&self) -> *const u8 {
        self.backing.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.backing.as_mut_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if let Backing::Owned { ptr, layout } = &self.backing {
            unsafe {
                dealloc(ptr.as_ptr(), *layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_region_honours_alignment() {
        let region =
            DmaRegion::new_aligned(3 * 128, PAGE_SIZE, RegionInit::Zeroed).expect("region");
        assert_eq!(region.len(), 384);
        assert_eq!(region.as_ptr() as usize % PAGE_SIZE, 0);
        assert!(region.as_slice().iter().all(|b| *b == 0));
        assert!(!region.is_huge());
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = DmaRegion::new_aligned(0, PAGE_SIZE, RegionInit::Zeroed).unwrap_err();
        assert!(matches!(err, PoolError::AllocationFailed { size: 0, .. }));
    }

    #[test]
    fn non_power_of_two_alignment_is_rejected() {
        assert!(DmaRegion::new_aligned(64, 48, RegionInit::Uninitialized).is_err());
    }

    #[test]
    fn huge_mapping_rounds_up_when_available() {
        // Hosts without reserved hugepages legitimately return None.
        if let Some(region) = DmaRegion::huge_pages(1) {
            assert_eq!(region.len(), HUGE_PAGE_SIZE);
            assert!(region.is_huge());
        }
    }
}
