//! Record writers.
//!
//! Each writer sizes the full record before touching the buffer: either the
//! whole record lands or the buffer is left exactly as it was.

use crate::error::{CodecError, CodecResult};
use crate::event::{Event, EventField, EventRecord, EventType, Handle};

/// Encodes `record` at the start of `buf`, returning the bytes written.
pub fn encode(buf: &mut [u8], record: &EventRecord<'_>) -> CodecResult<usize> {
    if let Event::NewSession { uri, peer_ip, .. } = record.event {
        check_len(EventField::Uri, uri.len())?;
        check_len(EventField::PeerIp, peer_ip.len())?;
    }

    let needed = record.encoded_len();
    if buf.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }

    let mut out = Cursor::new(&mut buf[..needed]);
    out.put_i32(record.event_type().code());
    out.put_u64(record.handle.0);

    match record.event {
        Event::NewSession {
            session,
            uri,
            peer_ip,
        } => {
            out.put_u64(session.0);
            out.put_str(uri);
            out.put_str(peer_ip);
        }
        Event::SessionError {
            error_type,
            error_reason,
        } => {
            out.put_i32(error_type);
            out.put_i32(error_reason);
        }
        Event::FdReady { fd, epoll_event } => {
            out.put_i32(fd);
            out.put_i32(epoll_event);
        }
        Event::SessionEstablished | Event::MsgComplete | Event::MsgError | Event::MsgReceived => {}
    }

    debug_assert_eq!(out.pos, needed, "{:?} size mismatch", record.event_type());
    Ok(needed)
}

/// Writes a `NewSession` record stamped with the listening side's `handle`.
pub fn write_new_session(
    buf: &mut [u8],
    handle: Handle,
    session: Handle,
    uri: &str,
    peer_ip: &str,
) -> CodecResult<usize> {
    encode(
        buf,
        &EventRecord::new(
            handle,
            Event::NewSession {
                session,
                uri,
                peer_ip,
            },
        ),
    )
}

pub fn write_session_established(buf: &mut [u8], handle: Handle) -> CodecResult<usize> {
    encode(buf, &EventRecord::new(handle, Event::SessionEstablished))
}

pub fn write_session_error(
    buf: &mut [u8],
    handle: Handle,
    error_type: i32,
    error_reason: i32,
) -> CodecResult<usize> {
    encode(
        buf,
        &EventRecord::new(
            handle,
            Event::SessionError {
                error_type,
                error_reason,
            },
        ),
    )
}

pub fn write_msg_complete(buf: &mut [u8], handle: Handle) -> CodecResult<usize> {
    encode(buf, &EventRecord::new(handle, Event::MsgComplete))
}

pub fn write_msg_error(buf: &mut [u8], handle: Handle) -> CodecResult<usize> {
    encode(buf, &EventRecord::new(handle, Event::MsgError))
}

/// Writes a `MsgReceived` record; `handle` names the slot holding the payload.
pub fn write_msg_received(buf: &mut [u8], handle: Handle) -> CodecResult<usize> {
    encode(buf, &EventRecord::new(handle, Event::MsgReceived))
}

pub fn write_fd_ready(
    buf: &mut [u8],
    handle: Handle,
    fd: i32,
    epoll_event: i32,
) -> CodecResult<usize> {
    encode(buf, &EventRecord::new(handle, Event::FdReady { fd, epoll_event }))
}

/// Size of the largest record with no variable-length fields.
pub const MAX_FIXED_RECORD_LEN: usize = crate::event::HEADER_LEN + 8;

/// Size of a `NewSession` record carrying the given strings.
pub fn new_session_len(uri: &str, peer_ip: &str) -> usize {
    crate::event::HEADER_LEN + EventType::NewSession.fixed_body_len() + uri.len() + peer_ip.len()
}

/// String lengths travel as `i32` prefixes.
fn check_len(field: EventField, len: usize) -> CodecResult<()> {
    if i32::try_from(len).is_err() {
        return Err(CodecError::FieldTooLong { field, len });
    }
    Ok(())
}

struct Cursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    fn put_i32(&mut self, value: i32) {
        self.put(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.put(&value.to_be_bytes());
    }

    /// Length prefix then bytes; the caller has already bounded the length.
    fn put_str(&mut self, value: &str) {
        self.put_i32(value.len() as i32);
        self.put(value.as_bytes());
    }
}
