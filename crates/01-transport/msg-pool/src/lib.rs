//! Pre-registered message buffer pool.
//!
//! * [`DmaRegion`] – contiguous, aligned memory (hugepage mapping or heap).
//! * [`DmaAllocator`] – allocation/registration strategy; [`HostDma`] is the host-only default.
//! * [`MsgPool`] / [`MsgSlot`] – fixed-capacity slot pool with O(1) acquire/release.
//! * [`SharedMsgPool`] – mutex-guarded handle for multi-threaded callers.
//! * [`PoolError`] – construction and teardown failures.

mod dma;
mod error;
mod pool;
mod region;
mod shared;

pub use dma::{
    AllocationPath, DmaAllocator, DmaError, HostDma, HostDmaConfig, MrHandle, RegisteredRegion,
};
pub use error::{PoolError, PoolResult};
pub use pool::{MsgPool, MsgSlot, PoolConfig, PoolId, SLOT_ALIGNMENT};
pub use region::{DmaRegion, RegionInit, HUGE_PAGE_SIZE, PAGE_SIZE};
pub use shared::SharedMsgPool;
