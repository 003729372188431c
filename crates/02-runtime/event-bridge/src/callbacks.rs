use event_codec::{Dispatch, Handle, SessionEventKind};

use crate::error::BridgeResult;

/// Notifications delivered by the transport's polling thread.
///
/// Each call queues exactly one record for the host reader (or fails without
/// queuing anything) and tells the polling loop whether to hand the batch
/// over now.
pub trait TransportCallbacks<S> {
    /// A peer opened a session on the listener identified by `server`.
    /// Returns the handle minted for the new session with the dispatch.
    /// A `server` that is not a live session is rejected and `session` is
    /// dropped unregistered.
    fn on_new_session(
        &mut self,
        server: Handle,
        session: S,
        uri: &str,
        peer_ip: &str,
    ) -> BridgeResult<(Handle, Dispatch)>;

    fn on_session_established(&mut self, session: Handle) -> BridgeResult<Dispatch>;

    fn on_session_error(
        &mut self,
        session: Handle,
        kind: SessionEventKind,
        reason: i32,
    ) -> BridgeResult<Dispatch>;

    fn on_msg_send_complete(&mut self, msg: Handle) -> BridgeResult<Dispatch>;

    fn on_msg_error(&mut self, msg: Handle) -> BridgeResult<Dispatch>;

    /// `more_in_batch` is false for the last message the poll returned.
    fn on_msg_received(&mut self, msg: Handle, more_in_batch: bool) -> BridgeResult<Dispatch>;

    fn on_fd_ready(&mut self, fd: i32, epoll_event: i32) -> BridgeResult<Dispatch>;
}
