//! Host side of the transport boundary.
//!
//! The transport never sees host objects. Sessions and in-flight messages live
//! in [`HandleRegistry`] tables and only their opaque handles travel in event
//! records, so a late callback for a closed session or a released message
//! resolves to [`BridgeError::UnknownHandle`] instead of a dangling object.

use tracing::{debug, warn};

use event_codec::{Dispatch, Event, EventQueue, EventRecord, Handle, SessionEventKind};
use msg_pool::{AllocationPath, DmaAllocator, HostDma, MsgPool, MsgSlot};

use crate::callbacks::TransportCallbacks;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::HandleRegistry;

pub struct EventBridge<S, A: DmaAllocator = HostDma> {
    pool: MsgPool<A>,
    sessions: HandleRegistry<S>,
    messages: HandleRegistry<MsgSlot>,
    events: EventQueue,
}

impl<S> EventBridge<S, HostDma> {
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        Self::with_allocator(config, HostDma::new(config.dma))
    }
}

impl<S, A: DmaAllocator> EventBridge<S, A> {
    pub fn with_allocator(config: BridgeConfig, dma: A) -> BridgeResult<Self> {
        config.validate()?;
        let pool = MsgPool::with_allocator(config.pool, dma)?;
        debug!(
            slots = pool.slot_count(),
            path = ?pool.allocation_path(),
            queue_bytes = config.event_queue_bytes,
            "event bridge ready"
        );
        Ok(Self {
            messages: HandleRegistry::with_capacity(pool.slot_count() as usize),
            pool,
            sessions: HandleRegistry::new(),
            events: EventQueue::new(config.event_queue_bytes, config.yield_threshold),
        })
    }

    pub fn register_session(&mut self, session: S) -> Handle {
        self.sessions.insert(session)
    }

    pub fn session(&self, handle: Handle) -> Option<&S> {
        self.sessions.get(handle)
    }

    pub fn session_mut(&mut self, handle: Handle) -> Option<&mut S> {
        self.sessions.get_mut(handle)
    }

    /// Unregisters a session; later callbacks naming it are rejected.
    pub fn close_session(&mut self, handle: Handle) -> Option<S> {
        let session = self.sessions.remove(handle)?;
        debug!(session = %handle, "session closed");
        Some(session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Lends a pool slot out as a message; `None` once the pool is exhausted.
    pub fn acquire_msg(&mut self) -> Option<Handle> {
        let slot = self.pool.acquire()?;
        Some(self.messages.insert(slot))
    }

    /// Returns the message's slot to the pool.
    pub fn release_msg(&mut self, msg: Handle) -> BridgeResult<()> {
        let slot = self
            .messages
            .remove(msg)
            .ok_or(BridgeError::UnknownHandle(msg))?;
        self.pool.release(slot);
        Ok(())
    }

    /// The slot backing a live message, e.g. to post it to the transport.
    pub fn msg_slot(&self, msg: Handle) -> BridgeResult<&MsgSlot> {
        self.messages
            .get(msg)
            .ok_or(BridgeError::UnknownHandle(msg))
    }

    pub fn msg_in(&self, msg: Handle) -> BridgeResult<&[u8]> {
        let slot = self.msg_slot(msg)?;
        Ok(self.pool.in_buf(slot))
    }

    pub fn msg_in_mut(&mut self, msg: Handle) -> BridgeResult<&mut [u8]> {
        let slot = self
            .messages
            .get(msg)
            .ok_or(BridgeError::UnknownHandle(msg))?;
        Ok(self.pool.in_buf_mut(slot))
    }

    pub fn msg_out(&self, msg: Handle) -> BridgeResult<&[u8]> {
        let slot = self.msg_slot(msg)?;
        Ok(self.pool.out_buf(slot))
    }

    pub fn msg_out_mut(&mut self, msg: Handle) -> BridgeResult<&mut [u8]> {
        let slot = self
            .messages
            .get(msg)
            .ok_or(BridgeError::UnknownHandle(msg))?;
        Ok(self.pool.out_buf_mut(slot))
    }

    pub fn msgs_in_flight(&self) -> usize {
        self.messages.len()
    }

    pub fn pool(&self) -> &MsgPool<A> {
        &self.pool
    }

    pub fn allocation_path(&self) -> AllocationPath {
        self.pool.allocation_path()
    }

    /// Records queued since the last [`EventBridge::clear_events`].
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Call once the host reader has consumed the batch.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Returns every in-flight message to the pool, then tears the pool down.
    pub fn shutdown(mut self) -> BridgeResult<()> {
        let reclaimed = self.messages.len();
        for (_, slot) in self.messages.drain() {
            self.pool.release(slot);
        }
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed in-flight messages at shutdown");
        }
        let open_sessions = self.sessions.len();
        if open_sessions > 0 {
            debug!(open_sessions, "dropping sessions at shutdown");
        }
        self.pool.destroy()?;
        Ok(())
    }

    fn require_session(&self, handle: Handle) -> BridgeResult<()> {
        if self.sessions.contains(handle) {
            Ok(())
        } else {
            Err(BridgeError::UnknownHandle(handle))
        }
    }

    fn require_msg(&self, handle: Handle) -> BridgeResult<()> {
        if self.messages.contains(handle) {
            Ok(())
        } else {
            Err(BridgeError::UnknownHandle(handle))
        }
    }

    fn push(&mut self, handle: Handle, event: Event<'_>) -> BridgeResult<Dispatch> {
        Ok(self.events.push(&EventRecord::new(handle, event))?)
    }
}

impl<S, A: DmaAllocator> TransportCallbacks<S> for EventBridge<S, A> {
    fn on_new_session(
        &mut self,
        server: Handle,
        session: S,
        uri: &str,
        peer_ip: &str,
    ) -> BridgeResult<(Handle, Dispatch)> {
        self.require_session(server)?;
        let handle = self.sessions.insert(session);
        let event = Event::NewSession {
            session: handle,
            uri,
            peer_ip,
        };
        match self.push(server, event) {
            Ok(dispatch) => {
                debug!(%server, session = %handle, uri, peer_ip, "new session");
                Ok((handle, dispatch))
            }
            Err(err) => {
                // The host never heard of it, so it must not stay registered.
                self.sessions.remove(handle);
                Err(err)
            }
        }
    }

    fn on_session_established(&mut self, session: Handle) -> BridgeResult<Dispatch> {
        self.require_session(session)?;
        self.push(session, Event::SessionEstablished)
    }

    fn on_session_error(
        &mut self,
        session: Handle,
        kind: SessionEventKind,
        reason: i32,
    ) -> BridgeResult<Dispatch> {
        self.require_session(session)?;
        let dispatch = self.push(
            session,
            Event::SessionError {
                error_type: kind.code(),
                error_reason: reason,
            },
        )?;
        if kind.ends_session() {
            self.close_session(session);
        }
        Ok(dispatch)
    }

    fn on_msg_send_complete(&mut self, msg: Handle) -> BridgeResult<Dispatch> {
        self.require_msg(msg)?;
        self.push(msg, Event::MsgComplete)
    }

    fn on_msg_error(&mut self, msg: Handle) -> BridgeResult<Dispatch> {
        self.require_msg(msg)?;
        self.push(msg, Event::MsgError)
    }

    fn on_msg_received(&mut self, msg: Handle, more_in_batch: bool) -> BridgeResult<Dispatch> {
        self.require_msg(msg)?;
        Ok(self.events.push_msg_received(msg, more_in_batch)?)
    }

    fn on_fd_ready(&mut self, fd: i32, epoll_event: i32) -> BridgeResult<Dispatch> {
        self.push(Handle::NULL, Event::FdReady { fd, epoll_event })
    }
}

impl<S, A: DmaAllocator> std::fmt::Debug for EventBridge<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("pool", &self.pool)
            .field("sessions", &self.sessions.len())
            .field("messages", &self.messages.len())
            .field("queued_bytes", &self.events.len())
            .finish()
    }
}
