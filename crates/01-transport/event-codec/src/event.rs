//! Event record model.
//!
//! Every record starts with a 12-byte header, `type:i32` then `handle:i64`,
//! followed by the fixed fields of its variant and, for `NewSession` only,
//! length-prefixed strings. All integers are big-endian and packed without
//! padding, so the record never depends on the writer's struct layout.
//!
//! ```text
//! header        : type:i32  handle:i64
//! NewSession    : session:i64 uri_len:i32 uri[uri_len] ip_len:i32 ip[ip_len]
//! SessionError  : error_type:i32 error_reason:i32
//! FdReady       : fd:i32 epoll_event:i32
//! others        : -
//! ```

use std::fmt;

/// Bytes in the `type` + `handle` header shared by every record.
pub const HEADER_LEN: usize = 4 + 8;

/// Opaque identity of a session or message on the host side of the boundary.
///
/// The value is minted by a registry and means nothing to the reader beyond
/// identity; it is never an address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl Handle {
    /// Stamped on records that are not about any session or message.
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Wire discriminant of a record.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    SessionError = 0,
    MsgError = 1,
    SessionEstablished = 2,
    MsgReceived = 3,
    NewSession = 4,
    MsgComplete = 5,
    FdReady = 6,
}

impl EventType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(EventType::SessionError),
            1 => Some(EventType::MsgError),
            2 => Some(EventType::SessionEstablished),
            3 => Some(EventType::MsgReceived),
            4 => Some(EventType::NewSession),
            5 => Some(EventType::MsgComplete),
            6 => Some(EventType::FdReady),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Bytes of variant payload that do not depend on string contents.
    pub fn fixed_body_len(self) -> usize {
        match self {
            EventType::NewSession => 8 + 4 + 4,
            EventType::SessionError | EventType::FdReady => 4 + 4,
            EventType::SessionEstablished
            | EventType::MsgComplete
            | EventType::MsgError
            | EventType::MsgReceived => 0,
        }
    }
}

/// Variable-length field names used in error reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventField {
    Uri,
    PeerIp,
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventField::Uri => f.write_str("uri"),
            EventField::PeerIp => f.write_str("peer ip"),
        }
    }
}

/// Session-level event taxonomy reported by the transport.
///
/// Carried on the wire as `SessionError::error_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Reject,
    Teardown,
    NewConnection,
    ConnectionEstablished,
    ConnectionTeardown,
    ConnectionClosed,
    ConnectionDisconnected,
    ConnectionRefused,
    ConnectionError,
    Error,
}

impl SessionEventKind {
    pub fn code(self) -> i32 {
        match self {
            SessionEventKind::Reject => 0,
            SessionEventKind::Teardown => 1,
            SessionEventKind::NewConnection => 2,
            SessionEventKind::ConnectionEstablished => 3,
            SessionEventKind::ConnectionTeardown => 4,
            SessionEventKind::ConnectionClosed => 5,
            SessionEventKind::ConnectionDisconnected => 6,
            SessionEventKind::ConnectionRefused => 7,
            SessionEventKind::ConnectionError => 8,
            SessionEventKind::Error => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => SessionEventKind::Reject,
            1 => SessionEventKind::Teardown,
            2 => SessionEventKind::NewConnection,
            3 => SessionEventKind::ConnectionEstablished,
            4 => SessionEventKind::ConnectionTeardown,
            5 => SessionEventKind::ConnectionClosed,
            6 => SessionEventKind::ConnectionDisconnected,
            7 => SessionEventKind::ConnectionRefused,
            8 => SessionEventKind::ConnectionError,
            9 => SessionEventKind::Error,
            _ => return None,
        })
    }

    /// Whether the session is gone once this event is delivered.
    pub fn ends_session(self) -> bool {
        matches!(self, SessionEventKind::Teardown | SessionEventKind::Reject)
    }
}

/// Variant payload of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// A peer asked to open a session; `session` identifies the new session.
    NewSession {
        session: Handle,
        uri: &'a str,
        peer_ip: &'a str,
    },
    SessionEstablished,
    SessionError {
        error_type: i32,
        error_reason: i32,
    },
    /// An outbound send finished.
    MsgComplete,
    /// An outbound send failed; the reason travels out of band.
    MsgError,
    /// A message landed in the slot identified by the record handle.
    MsgReceived,
    /// A raw descriptor the host polls itself became ready.
    FdReady { fd: i32, epoll_event: i32 },
}

impl Event<'_> {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::NewSession { .. } => EventType::NewSession,
            Event::SessionEstablished => EventType::SessionEstablished,
            Event::SessionError { .. } => EventType::SessionError,
            Event::MsgComplete => EventType::MsgComplete,
            Event::MsgError => EventType::MsgError,
            Event::MsgReceived => EventType::MsgReceived,
            Event::FdReady { .. } => EventType::FdReady,
        }
    }
}

/// One transport notification: the header handle plus its variant payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventRecord<'a> {
    pub handle: Handle,
    pub event: Event<'a>,
}

impl<'a> EventRecord<'a> {
    pub const fn new(handle: Handle, event: Event<'a>) -> Self {
        Self { handle, event }
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Total encoded size; the string lengths are taken from their contents.
    pub fn encoded_len(&self) -> usize {
        let variable = match self.event {
            Event::NewSession { uri, peer_ip, .. } => uri.len() + peer_ip.len(),
            _ => 0,
        };
        HEADER_LEN + self.event_type().fixed_body_len() + variable
    }

    /// Decoded `SessionError::error_type`, if it is a known session event.
    pub fn session_event_kind(&self) -> Option<SessionEventKind> {
        match self.event {
            Event::SessionError { error_type, .. } => SessionEventKind::from_code(error_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for code in 0..7 {
            let ty = EventType::from_i32(code).expect("known code");
            assert_eq!(ty.code(), code);
        }
        assert_eq!(EventType::from_i32(7), None);
        assert_eq!(EventType::from_i32(-1), None);
    }

    #[test]
    fn session_kinds_round_trip() {
        for code in 0..10 {
            let kind = SessionEventKind::from_code(code).expect("known kind");
            assert_eq!(kind.code(), code);
        }
        assert_eq!(SessionEventKind::from_code(10), None);
        assert!(SessionEventKind::Teardown.ends_session());
        assert!(!SessionEventKind::ConnectionError.ends_session());
    }

    #[test]
    fn encoded_len_counts_string_bytes() {
        let record = EventRecord::new(
            Handle(1),
            Event::NewSession {
                session: Handle(2),
                uri: "rdma://10.0.0.1:5000",
                peer_ip: "10.0.0.1",
            },
        );
        assert_eq!(record.encoded_len(), HEADER_LEN + 16 + 20 + 8);

        let error = EventRecord::new(
            Handle(0xABCD),
            Event::SessionError {
                error_type: 2,
                error_reason: 104,
            },
        );
        assert_eq!(error.encoded_len(), HEADER_LEN + 8);
        assert_eq!(
            error.session_event_kind(),
            Some(SessionEventKind::NewConnection)
        );
        assert_eq!(
            EventRecord::new(Handle(3), Event::MsgReceived).encoded_len(),
            HEADER_LEN
        );
    }
}
