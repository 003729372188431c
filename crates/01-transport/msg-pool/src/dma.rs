//! DMA allocation and registration strategy.
//!
//! The pool never talks to an RDMA device directly. It asks a [`DmaAllocator`]
//! for memory, preferring a region that comes back already registered
//! (hugepages) and falling back to registering ordinary heap memory. Real
//! transports plug in their verbs-backed allocator; [`HostDma`] keeps the pool
//! usable on hosts without a NIC.

use crate::region::{DmaRegion, HUGE_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque registration token for a region made visible to DMA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MrHandle {
    key: u32,
    addr: usize,
    len: usize,
}

impl MrHandle {
    /// Builds a handle from the values the registration subsystem returned.
    pub const fn new(key: u32, addr: usize, len: usize) -> Self {
        Self { key, addr, len }
    }

    /// Local key identifying the registration.
    pub fn key(&self) -> u32 {
        self.key
    }

    /// Start address of the registered range.
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Length of the registered range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the registration covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `[addr, addr + len)` lies inside this registration.
    pub fn covers(&self, addr: usize, len: usize) -> bool {
        addr >= self.addr
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.addr + self.len)
    }
}

/// A region that was allocated and registered in one step.
#[derive(Debug)]
pub struct RegisteredRegion {
    pub region: DmaRegion,
    pub mr: MrHandle,
}

/// Failure reported by the registration subsystem during teardown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DmaError {
    pub code: i32,
    pub message: String,
}

impl DmaError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.message, self.code)
    }
}

impl std::error::Error for DmaError {}

/// Which allocation path produced a pool's region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationPath {
    /// Zero-copy hugepage allocation, registered by the allocator.
    HugePages,
    /// Heap allocation followed by explicit registration.
    Fallback,
}

/// Allocation and registration interface consumed by [`crate::MsgPool`].
pub trait DmaAllocator: Send {
    /// Allocates `len` bytes that come back already registered, if supported.
    fn alloc_registered(&mut self, len: usize) -> Option<RegisteredRegion>;

    /// Registers an existing region for DMA.
    fn register(&mut self, region: &mut DmaRegion) -> Option<MrHandle>;

    /// Releases a registration obtained through [`DmaAllocator::register`].
    fn deregister(&mut self, mr: MrHandle) -> Result<(), DmaError>;

    /// Releases a region obtained through [`DmaAllocator::alloc_registered`].
    fn free_registered(&mut self, region: RegisteredRegion) -> Result<(), DmaError>;
}

/// Settings for [`HostDma`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostDmaConfig {
    /// Probe the hugepage pool before falling back to the heap.
    pub huge_pages: bool,
}

impl Default for HostDmaConfig {
    fn default() -> Self {
        Self { huge_pages: true }
    }
}

/// Host-only allocator: hugepage mappings plus software memory keys.
#[derive(Debug)]
pub struct HostDma {
    config: HostDmaConfig,
    next_key: u32,
    live: usize,
}

impl Default for HostDma {
    fn default() -> Self {
        Self::new(HostDmaConfig::default())
    }
}

impl HostDma {
    pub fn new(config: HostDmaConfig) -> Self {
        Self {
            config,
            next_key: 1,
            live: 0,
        }
    }

    /// Number of registrations currently outstanding.
    pub fn live_registrations(&self) -> usize {
        self.live
    }

    fn issue(&mut self, addr: usize, len: usize) -> MrHandle {
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1).max(1);
        self.live += 1;
        MrHandle::new(key, addr, len)
    }

    fn retire(&mut self, mr: MrHandle) -> Result<(), DmaError> {
        if self.live == 0 {
            return Err(DmaError::new(
                -1,
                format!("no live registration for key {}", mr.key()),
            ));
        }
        self.live -= 1;
        Ok(())
    }
}

impl DmaAllocator for HostDma {
    fn alloc_registered(&mut self, len: usize) -> Option<RegisteredRegion> {
        if !self.config.huge_pages {
            return None;
        }
        let region = DmaRegion::huge_pages(len)?;
        debug_assert_eq!(region.len() % HUGE_PAGE_SIZE, 0);
        let mr = self.issue(region.as_ptr() as usize, region.len());
        Some(RegisteredRegion { region, mr })
    }

    fn register(&mut self, region: &mut DmaRegion) -> Option<MrHandle> {
        Some(self.issue(region.as_ptr() as usize, region.len()))
    }

    fn deregister(&mut self, mr: MrHandle) -> Result<(), DmaError> {
        self.retire(mr)
    }

    fn free_registered(&mut self, region: RegisteredRegion) -> Result<(), DmaError> {
        let RegisteredRegion { region, mr } = region;
        drop(region);
        self.retire(mr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{RegionInit, PAGE_SIZE};

    #[test]
    fn host_dma_issues_distinct_keys() {
        let mut dma = HostDma::new(HostDmaConfig { huge_pages: false });
        let mut a = DmaRegion::new_aligned(256, PAGE_SIZE, RegionInit::Zeroed).unwrap();
        let mut b = DmaRegion::new_aligned(256, PAGE_SIZE, RegionInit::Zeroed).unwrap();
        let mr_a = dma.register(&mut a).expect("register a");
        let mr_b = dma.register(&mut b).expect("register b");
        assert_ne!(mr_a.key(), mr_b.key());
        assert_eq!(dma.live_registrations(), 2);
        dma.deregister(mr_a).unwrap();
        dma.deregister(mr_b).unwrap();
        assert_eq!(dma.live_registrations(), 0);
        assert!(dma.deregister(mr_a).is_err());
    }

    #[test]
    fn disabled_huge_pages_skip_probe() {
        let mut dma = HostDma::new(HostDmaConfig { huge_pages: false });
        assert!(dma.alloc_registered(4096).is_none());
    }

    #[test]
    fn covers_checks_bounds() {
        let mr = MrHandle::new(7, 0x1000, 0x100);
        assert!(mr.covers(0x1000, 0x100));
        assert!(mr.covers(0x1080, 0x10));
        assert!(!mr.covers(0x10F0, 0x20));
        assert!(!mr.covers(0x0FFF, 1));
        assert!(!mr.covers(usize::MAX, 2));
    }
}
