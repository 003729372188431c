//! Fixed-layout binary records for asynchronous transport notifications.
//!
//! * [`EventRecord`] / [`Event`] – tagged model of the seven notification kinds.
//! * [`encode`] and the `write_*` helpers – big-endian, padding-free writers.
//! * [`decode`] / [`EventReader`] – validating readers that borrow from the buffer.
//! * [`EventQueue`] – batch buffer handed to the host reader.

mod decode;
mod encode;
mod error;
mod event;
mod queue;

pub use decode::{decode, EventReader};
pub use encode::{
    encode, new_session_len, write_fd_ready, write_msg_complete, write_msg_error,
    write_msg_received, write_new_session, write_session_error, write_session_established,
    MAX_FIXED_RECORD_LEN,
};
pub use error::{CodecError, CodecResult};
pub use event::{Event, EventField, EventRecord, EventType, Handle, SessionEventKind, HEADER_LEN};
pub use queue::{Dispatch, EventQueue};
