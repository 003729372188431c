//! Record readers.
//!
//! Decoding mirrors the host bridge: read `type`, validate it, read the
//! handle, then the variant's fixed fields, then any length-prefixed strings.
//! Strings are borrowed from the input buffer.

use crate::error::{CodecError, CodecResult};
use crate::event::{Event, EventField, EventRecord, EventType, Handle};

/// Decodes the record at the start of `buf`, returning it and its length.
pub fn decode(buf: &[u8]) -> CodecResult<(EventRecord<'_>, usize)> {
    let mut input = Reader::new(buf);
    let code = input.i32()?;
    let ty = EventType::from_i32(code).ok_or(CodecError::UnknownEventType(code))?;
    let handle = Handle(input.u64()?);

    let event = match ty {
        EventType::NewSession => {
            let session = Handle(input.u64()?);
            let uri = input.str(EventField::Uri)?;
            let peer_ip = input.str(EventField::PeerIp)?;
            Event::NewSession {
                session,
                uri,
                peer_ip,
            }
        }
        EventType::SessionError => Event::SessionError {
            error_type: input.i32()?,
            error_reason: input.i32()?,
        },
        EventType::FdReady => Event::FdReady {
            fd: input.i32()?,
            epoll_event: input.i32()?,
        },
        EventType::SessionEstablished => Event::SessionEstablished,
        EventType::MsgComplete => Event::MsgComplete,
        EventType::MsgError => Event::MsgError,
        EventType::MsgReceived => Event::MsgReceived,
    };

    Ok((EventRecord::new(handle, event), input.pos))
}

/// Iterator over back-to-back records.
///
/// Yields `Err` once and then stops if a record fails to decode; the error
/// position is available through [`EventReader::offset`].
#[derive(Clone, Debug)]
pub struct EventReader<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> EventReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record to decode.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for EventReader<'a> {
    type Item = CodecResult<EventRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match decode(&self.buf[self.offset..]) {
            Ok((record, len)) => {
                self.offset += len;
                Some(Ok(record))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::Truncated {
                needed: self.pos.saturating_add(len),
                available: self.buf.len(),
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn str(&mut self, field: EventField) -> CodecResult<&'a str> {
        let len = self.i32()?;
        let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength { field, len })?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8(field))
    }
}
