//! Fixed-capacity pool of pre-registered message buffers.
//!
//! One contiguous region is sliced into `slot_count` slots of
//! `in_size + out_size` bytes. Slot `i` always lives at `base + i * stride`;
//! slots are recycled through an index stack and never move or reallocate,
//! so acquire and release stay O(1) on the per-message hot path.
//!
//! ```text
//! base
//!  | slot 0             | slot 1             | ... | slot n-1           |
//!  | in_size | out_size | in_size | out_size |     | in_size | out_size |
//! ```

use crate::dma::{AllocationPath, DmaAllocator, HostDma, MrHandle, RegisteredRegion};
use crate::region::{DmaRegion, RegionInit, PAGE_SIZE};
use crate::{PoolError, PoolResult};
use serde::{Deserialize, Serialize};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, warn};

/// Stride alignment the transport prefers; other strides work but are logged.
pub const SLOT_ALIGNMENT: usize = 64;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a pool, carried by every slot it lends out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Shape of a message pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of slots managed by the pool.
    pub slot_count: u32,
    /// Bytes reserved per slot for inbound payloads.
    pub in_size: usize,
    /// Bytes reserved per slot for outbound payloads.
    pub out_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slot_count: 1024,
            in_size: 8 * 1024,
            out_size: 8 * 1024,
        }
    }
}

impl PoolConfig {
    pub const fn new(slot_count: u32, in_size: usize, out_size: usize) -> Self {
        Self {
            slot_count,
            in_size,
            out_size,
        }
    }

    /// Bytes between consecutive slots.
    pub fn stride(&self) -> PoolResult<usize> {
        self.in_size
            .checked_add(self.out_size)
            .filter(|stride| *stride > 0)
            .ok_or_else(|| self.invalid())
    }

    /// Total bytes backing the pool: `slot_count * (in_size + out_size)`.
    pub fn region_len(&self) -> PoolResult<usize> {
        if self.slot_count == 0 {
            return Err(self.invalid());
        }
        self.stride()?
            .checked_mul(self.slot_count as usize)
            .ok_or_else(|| self.invalid())
    }

    fn invalid(&self) -> PoolError {
        PoolError::InvalidConfig {
            slot_count: self.slot_count,
            in_size: self.in_size,
            out_size: self.out_size,
        }
    }
}

/// A slot lent out by a [`MsgPool`].
///
/// Slots are tokens: they are not `Clone`, and the only way to give one back is
/// to move it into [`MsgPool::release`]. The payload bytes are reached through
/// the owning pool. The raw addresses exposed here are for zero-copy hand-off
/// to the transport and are only meaningful while the pool is alive.
#[derive(Debug, PartialEq, Eq)]
pub struct MsgSlot {
    index: u32,
    pool: PoolId,
    addr: usize,
    in_size: usize,
    out_size: usize,
    mr: MrHandle,
}

impl MsgSlot {
    /// Position of the slot inside its pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Identity of the pool that owns this slot.
    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    /// Address of the inbound region (also the slot base).
    pub fn in_addr(&self) -> usize {
        self.addr
    }

    /// Address of the outbound region.
    pub fn out_addr(&self) -> usize {
        self.addr + self.in_size
    }

    pub fn in_size(&self) -> usize {
        self.in_size
    }

    pub fn out_size(&self) -> usize {
        self.out_size
    }

    /// Registration shared by every slot of the pool.
    pub fn mr(&self) -> MrHandle {
        self.mr
    }
}

#[derive(Debug)]
enum Backing {
    Registered(RegisteredRegion),
    Fallback { region: DmaRegion, mr: MrHandle },
}

/// Fixed-size pool of DMA-registered message buffers.
///
/// The pool is not internally synchronised: every mutating method takes
/// `&mut self`. Wrap it in [`crate::SharedMsgPool`] to share it across threads.
///
/// Dropping the pool deregisters and frees the region. Raw slot addresses
/// held past that point dangle; returning every slot first is the caller's
/// job.
pub struct MsgPool<A: DmaAllocator = HostDma> {
    id: PoolId,
    config: PoolConfig,
    stride: usize,
    region_len: usize,
    base: NonNull<u8>,
    mr: MrHandle,
    path: AllocationPath,
    backing: Option<Backing>,
    free: Vec<u32>,
    dma: A,
}

// SAFETY: `base` points into `backing`, which the pool owns exclusively. The
// pool is only ever mutated through `&mut self`.
unsafe impl<A: DmaAllocator> Send for MsgPool<A> {}

impl MsgPool<HostDma> {
    /// Builds a pool backed by [`HostDma`] with default settings.
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        Self::with_allocator(config, HostDma::default())
    }
}

impl<A: DmaAllocator> MsgPool<A> {
    /// Allocates and registers the region, then places every slot on the free list.
    ///
    /// The allocator's pre-registered (hugepage) path is tried first. When it
    /// is unavailable the region comes from the heap and is registered
    /// explicitly; if that registration fails the heap memory is released and
    /// [`PoolError::RegistrationFailed`] is returned.
    pub fn with_allocator(config: PoolConfig, mut dma: A) -> PoolResult<Self> {
        let region_len = config.region_len()?;
        let stride = config.stride()?;

        if stride % SLOT_ALIGNMENT != 0 {
            debug!(
                stride,
                alignment = SLOT_ALIGNMENT,
                "slot stride is not cache-line aligned"
            );
        }

        let (mut backing, path) = match dma.alloc_registered(region_len) {
            Some(registered) if registered.region.len() >= region_len => {
                (Backing::Registered(registered), AllocationPath::HugePages)
            }
            Some(short) => {
                warn!(
                    requested = region_len,
                    got = short.region.len(),
                    "pre-registered region too small; discarding"
                );
                if let Err(err) = dma.free_registered(short) {
                    debug!(%err, "failed to free undersized pre-registered region");
                }
                (Self::fallback(&mut dma, region_len)?, AllocationPath::Fallback)
            }
            None => {
                warn!(
                    len = region_len,
                    "hugepage allocation unavailable; registering heap memory instead, \
                     this could hurt performance"
                );
                (Self::fallback(&mut dma, region_len)?, AllocationPath::Fallback)
            }
        };

        let (base, mr) = match &mut backing {
            Backing::Registered(registered) => (registered.region.as_mut_ptr(), registered.mr),
            Backing::Fallback { region, mr } => (region.as_mut_ptr(), *mr),
        };
        let base = NonNull::new(base).ok_or(PoolError::AllocationFailed {
            size: region_len,
            alignment: PAGE_SIZE,
        })?;

        let slot_count = config.slot_count;
        let free: Vec<u32> = (0..slot_count).rev().collect();

        debug!(
            slot_count,
            in_size = config.in_size,
            out_size = config.out_size,
            ?path,
            "message pool ready"
        );

        Ok(Self {
            id: PoolId::next(),
            config,
            stride,
            region_len,
            base,
            mr,
            path,
            backing: Some(backing),
            free,
            dma,
        })
    }

    fn fallback(dma: &mut A, len: usize) -> PoolResult<Backing> {
        let mut region = DmaRegion::new_aligned(len, PAGE_SIZE, RegionInit::Zeroed)?;
        match dma.register(&mut region) {
            Some(mr) => Ok(Backing::Fallback { region, mr }),
            None => {
                error!(
                    addr = region.as_ptr() as usize,
                    len,
                    "registering pool memory failed"
                );
                drop(region);
                Err(PoolError::RegistrationFailed { size: len })
            }
        }
    }

    /// Pops the next free slot, or `None` when every slot is lent out.
    pub fn acquire(&mut self) -> Option<MsgSlot> {
        let index = self.free.pop()?;
        Some(self.slot_at(index))
    }

    /// Returns a slot to the free list; it becomes the next slot acquired.
    ///
    /// Releasing a slot from another pool is a contract violation that debug
    /// builds assert on; release builds do not check. A slot cannot be
    /// released twice because [`MsgSlot`] is moved in and is not `Clone`.
    /// The overflow assertion below only fires if two pools ever share a
    /// [`PoolId`].
    pub fn release(&mut self, slot: MsgSlot) {
        debug_assert_eq!(
            slot.pool, self.id,
            "slot {} released into a pool that does not own it",
            slot.index
        );
        debug_assert!(
            self.free.len() < self.config.slot_count as usize,
            "free list overflowed; idx={}",
            slot.index
        );
        self.free.push(slot.index);
    }

    /// Inbound payload bytes of `slot`.
    pub fn in_buf(&self, slot: &MsgSlot) -> &[u8] {
        let offset = self.offset_of(slot);
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), self.config.in_size) }
    }

    /// Mutable inbound payload bytes of `slot`.
    pub fn in_buf_mut(&mut self, slot: &MsgSlot) -> &mut [u8] {
        let offset = self.offset_of(slot);
        unsafe {
            // SAFETY: `offset_of` bounds the slot inside the region and `&mut self`
            // rules out other borrows of the pool's memory.
            std::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), self.config.in_size)
        }
    }

    /// Outbound payload bytes of `slot`.
    pub fn out_buf(&self, slot: &MsgSlot) -> &[u8] {
        let offset = self.offset_of(slot) + self.config.in_size;
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), self.config.out_size) }
    }

    /// Mutable outbound payload bytes of `slot`.
    pub fn out_buf_mut(&mut self, slot: &MsgSlot) -> &mut [u8] {
        let offset = self.offset_of(slot) + self.config.in_size;
        unsafe {
            std::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), self.config.out_size)
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn slot_count(&self) -> u32 {
        self.config.slot_count
    }

    pub fn in_size(&self) -> usize {
        self.config.in_size
    }

    pub fn out_size(&self) -> usize {
        self.config.out_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes used by the slots; the mapping itself may be larger (hugepages).
    pub fn region_len(&self) -> usize {
        self.region_len
    }

    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn mr(&self) -> MrHandle {
        self.mr
    }

    pub fn allocation_path(&self) -> AllocationPath {
        self.path
    }

    /// Number of slots currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of slots currently lent out.
    pub fn in_use(&self) -> usize {
        self.config.slot_count as usize - self.free.len()
    }

    /// Borrow the allocator, e.g. to inspect registrations.
    pub fn allocator(&self) -> &A {
        &self.dma
    }

    /// Drains the free list and releases the region, reporting teardown failures.
    pub fn destroy(mut self) -> PoolResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> PoolResult<()> {
        let Some(backing) = self.backing.take() else {
            return Ok(());
        };

        let outstanding = self.in_use();
        if outstanding > 0 {
            warn!(
                outstanding,
                pool = self.id.get(),
                "tearing down message pool with slots still lent out"
            );
        }
        self.free.clear();

        let result = match backing {
            Backing::Registered(registered) => self.dma.free_registered(registered),
            Backing::Fallback { region, mr } => {
                let result = self.dma.deregister(mr);
                drop(region);
                result
            }
        };
        debug!(pool = self.id.get(), path = ?self.path, "message pool released");
        result.map_err(PoolError::Teardown)
    }

    fn slot_at(&self, index: u32) -> MsgSlot {
        MsgSlot {
            index,
            pool: self.id,
            addr: self.base_addr() + index as usize * self.stride,
            in_size: self.config.in_size,
            out_size: self.config.out_size,
            mr: self.mr,
        }
    }

    fn offset_of(&self, slot: &MsgSlot) -> usize {
        assert!(
            slot.index < self.config.slot_count,
            "slot {} out of range",
            slot.index
        );
        debug_assert_eq!(slot.pool, self.id, "slot {} belongs to another pool", slot.index);
        slot.index as usize * self.stride
    }
}

impl<A: DmaAllocator> Drop for MsgPool<A> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            debug!(%err, "message pool teardown failed");
        }
    }
}

impl<A: DmaAllocator> std::fmt::Debug for MsgPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgPool")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("path", &self.path)
            .field("free", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{DmaError, HostDmaConfig};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SLOT_COUNT: u32 = 8;

    fn pool(count: u32, in_size: usize, out_size: usize) -> MsgPool {
        MsgPool::with_allocator(
            PoolConfig::new(count, in_size, out_size),
            HostDma::new(HostDmaConfig { huge_pages: false }),
        )
        .expect("create msg pool")
    }

    /// Call counts shared with a [`ScriptedDma`]; readable after the pool is gone.
    #[derive(Default)]
    struct DmaCalls {
        registered: AtomicUsize,
        deregistered: AtomicUsize,
        freed: AtomicUsize,
    }

    impl DmaCalls {
        fn counts(&self) -> (usize, usize, usize) {
            (
                self.registered.load(Ordering::Relaxed),
                self.deregistered.load(Ordering::Relaxed),
                self.freed.load(Ordering::Relaxed),
            )
        }
    }

    /// Allocator that counts calls and can be told to fail.
    #[derive(Default)]
    struct ScriptedDma {
        offer_registered: bool,
        /// Bytes to withhold from the pre-registered region.
        short_by: usize,
        fail_register: bool,
        fail_deregister: bool,
        calls: Arc<DmaCalls>,
    }

    impl DmaAllocator for ScriptedDma {
        fn alloc_registered(&mut self, len: usize) -> Option<RegisteredRegion> {
            if !self.offer_registered {
                return None;
            }
            let len = len - self.short_by;
            let mut region = DmaRegion::new_aligned(len, PAGE_SIZE, RegionInit::Zeroed).ok()?;
            let mr = MrHandle::new(99, region.as_mut_ptr() as usize, len);
            Some(RegisteredRegion { region, mr })
        }

        fn register(&mut self, region: &mut DmaRegion) -> Option<MrHandle> {
            if self.fail_register {
                return None;
            }
            self.calls.registered.fetch_add(1, Ordering::Relaxed);
            Some(MrHandle::new(7, region.as_mut_ptr() as usize, region.len()))
        }

        fn deregister(&mut self, _mr: MrHandle) -> Result<(), DmaError> {
            self.calls.deregistered.fetch_add(1, Ordering::Relaxed);
            if self.fail_deregister {
                return Err(DmaError::new(22, "invalid argument"));
            }
            Ok(())
        }

        fn free_registered(&mut self, _region: RegisteredRegion) -> Result<(), DmaError> {
            self.calls.freed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn exhaustion_then_reuse() {
        let mut pool = pool(3, 64, 64);
        let a = pool.acquire().expect("first");
        let b = pool.acquire().expect("second");
        let c = pool.acquire().expect("third");
        assert!(pool.acquire().is_none(), "pool should be exhausted");

        let released = b.index();
        pool.release(b);
        let again = pool.acquire().expect("slot after release");
        assert_eq!(again.index(), released);

        for slot in [a, c, again] {
            pool.release(slot);
        }
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn fresh_pool_hands_out_index_order() {
        let mut pool = pool(SLOT_COUNT, 32, 32);
        let order: Vec<u32> = (0..SLOT_COUNT)
            .map(|_| pool.acquire().expect("slot").index())
            .collect();
        assert_eq!(order, (0..SLOT_COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn slot_addresses_follow_stride() {
        let mut pool = pool(SLOT_COUNT, 128, 64);
        assert_eq!(pool.region_len(), SLOT_COUNT as usize * 192);
        let base = pool.base_addr();
        let mut seen = HashSet::new();
        while let Some(slot) = pool.acquire() {
            assert_eq!(slot.in_addr(), base + slot.index() as usize * 192);
            assert_eq!(slot.out_addr(), slot.in_addr() + 128);
            assert!(pool.mr().covers(slot.in_addr(), 192));
            assert!(seen.insert(slot.in_addr()));
        }
        assert_eq!(seen.len(), SLOT_COUNT as usize);
    }

    #[test]
    fn in_and_out_regions_do_not_overlap() {
        let mut pool = pool(2, 16, 8);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        pool.in_buf_mut(&first).fill(0x11);
        pool.out_buf_mut(&first).fill(0x22);
        pool.in_buf_mut(&second).fill(0x33);
        pool.out_buf_mut(&second).fill(0x44);

        assert!(pool.in_buf(&first).iter().all(|b| *b == 0x11));
        assert!(pool.out_buf(&first).iter().all(|b| *b == 0x22));
        assert!(pool.in_buf(&second).iter().all(|b| *b == 0x33));
        assert_eq!(pool.out_buf(&second).len(), 8);
        assert!(pool.out_buf(&second).iter().all(|b| *b == 0x44));
        pool.release(first);
        pool.release(second);
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        let dma = || HostDma::new(HostDmaConfig { huge_pages: false });
        assert!(matches!(
            MsgPool::with_allocator(PoolConfig::new(0, 64, 64), dma()),
            Err(PoolError::InvalidConfig { slot_count: 0, .. })
        ));
        assert!(matches!(
            MsgPool::with_allocator(PoolConfig::new(4, 0, 0), dma()),
            Err(PoolError::InvalidConfig { .. })
        ));
        assert!(matches!(
            MsgPool::with_allocator(PoolConfig::new(u32::MAX, usize::MAX / 2, 2), dma()),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn preregistered_path_is_preferred() {
        let dma = ScriptedDma {
            offer_registered: true,
            ..ScriptedDma::default()
        };
        let calls = Arc::clone(&dma.calls);
        let pool = MsgPool::with_allocator(PoolConfig::new(4, 64, 64), dma).expect("pool");
        assert_eq!(pool.allocation_path(), AllocationPath::HugePages);
        assert_eq!(pool.mr().key(), 99);
        assert_eq!(calls.counts(), (0, 0, 0));

        pool.destroy().expect("destroy");
        // (registered, deregistered, freed)
        assert_eq!(calls.counts(), (0, 0, 1));
    }

    #[test]
    fn dropping_a_preregistered_pool_frees_it() {
        let dma = ScriptedDma {
            offer_registered: true,
            ..ScriptedDma::default()
        };
        let calls = Arc::clone(&dma.calls);
        let mut pool = MsgPool::with_allocator(PoolConfig::new(2, 64, 64), dma).expect("pool");
        let slot = pool.acquire().expect("slot");
        pool.release(slot);
        drop(pool);
        assert_eq!(calls.counts(), (0, 0, 1));
    }

    #[test]
    fn short_preregistered_region_falls_back() {
        let dma = ScriptedDma {
            offer_registered: true,
            short_by: 64,
            ..ScriptedDma::default()
        };
        let calls = Arc::clone(&dma.calls);
        let pool = MsgPool::with_allocator(PoolConfig::new(4, 64, 64), dma).expect("pool");
        assert_eq!(pool.allocation_path(), AllocationPath::Fallback);
        assert_eq!(pool.mr().key(), 7);
        assert_eq!(pool.mr().len(), 4 * 128);
        // The undersized region went back to the allocator before the fallback.
        assert_eq!(calls.counts(), (1, 0, 1));

        pool.destroy().expect("destroy");
        assert_eq!(calls.counts(), (1, 1, 1));
    }

    #[test]
    fn fallback_registers_heap_memory() {
        let dma = ScriptedDma::default();
        let calls = Arc::clone(&dma.calls);
        let pool = MsgPool::with_allocator(PoolConfig::new(4, 64, 64), dma).expect("pool");
        assert_eq!(pool.allocation_path(), AllocationPath::Fallback);
        assert_eq!(pool.mr().addr(), pool.base_addr());
        assert_eq!(pool.mr().len(), 4 * 128);
        assert_eq!(calls.counts(), (1, 0, 0));

        pool.destroy().expect("destroy");
        assert_eq!(calls.counts(), (1, 1, 0));
    }

    #[test]
    fn dropping_a_fallback_pool_deregisters_it() {
        let dma = ScriptedDma::default();
        let calls = Arc::clone(&dma.calls);
        drop(MsgPool::with_allocator(PoolConfig::new(4, 64, 64), dma).expect("pool"));
        assert_eq!(calls.counts(), (1, 1, 0));
    }

    #[test]
    fn registration_failure_fails_construction() {
        let dma = ScriptedDma {
            fail_register: true,
            ..ScriptedDma::default()
        };
        let err = MsgPool::with_allocator(PoolConfig::new(4, 64, 64), dma).unwrap_err();
        assert!(matches!(err, PoolError::RegistrationFailed { size: 512 }));
    }

    #[test]
    fn destroy_reports_deregistration_failure() {
        let dma = ScriptedDma {
            fail_deregister: true,
            ..ScriptedDma::default()
        };
        let pool = MsgPool::with_allocator(PoolConfig::new(2, 64, 0), dma).expect("pool");
        let err = pool.destroy().unwrap_err();
        assert!(matches!(err, PoolError::Teardown(DmaError { code: 22, .. })));
    }

    #[test]
    fn host_dma_tracks_fallback_registration() {
        let mut pool = pool(4, 64, 64);
        assert_eq!(pool.allocator().live_registrations(), 1);
        let slot = pool.acquire().unwrap();
        pool.release(slot);
        pool.destroy().expect("destroy");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not own it")]
    fn cross_pool_release_is_caught_in_debug() {
        let mut left = pool(2, 64, 64);
        let mut right = pool(2, 64, 64);
        let slot = left.acquire().unwrap();
        right.release(slot);
    }

    #[test]
    fn churn_does_not_leak_slots() {
        let mut pool = pool(SLOT_COUNT, 64, 64);
        for i in 0..10_000u32 {
            let slot = pool
                .acquire()
                .unwrap_or_else(|| panic!("run {i} expected free slot"));
            pool.out_buf_mut(&slot).fill(i as u8);
            pool.release(slot);
        }
        assert_eq!(pool.free_count(), SLOT_COUNT as usize);
        assert_eq!(pool.in_use(), 0);
    }
}
