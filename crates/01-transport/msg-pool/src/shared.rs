//! Lock-guarded pool handle for callers that acquire and release from
//! several threads.

use crate::dma::{DmaAllocator, HostDma};
use crate::pool::{MsgPool, MsgSlot};
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable, externally synchronised view of a [`MsgPool`].
pub struct SharedMsgPool<A: DmaAllocator = HostDma> {
    inner: Arc<Mutex<MsgPool<A>>>,
}

impl<A: DmaAllocator> Clone for SharedMsgPool<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: DmaAllocator> SharedMsgPool<A> {
    pub fn new(pool: MsgPool<A>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    pub fn acquire(&self) -> Option<MsgSlot> {
        self.inner.lock().acquire()
    }

    pub fn release(&self, slot: MsgSlot) {
        self.inner.lock().release(slot);
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free_count()
    }

    /// Runs `f` with exclusive access to the pool, e.g. to fill a slot's buffers.
    pub fn with<R>(&self, f: impl FnOnce(&mut MsgPool<A>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
