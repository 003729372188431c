//! Fixed-capacity event queue shared with the host reader.
//!
//! The transport's polling thread appends records back to back; the host
//! drains the whole batch whenever a push answers [`Dispatch::Yield`]. A batch
//! ends when:
//! * a session-level or fd-ready record is queued,
//! * a received message is the last of its batch (`more_in_batch == false`),
//! * fewer than `yield_threshold` bytes remain.

use tracing::trace;

use crate::decode::EventReader;
use crate::encode::encode;
use crate::error::CodecResult;
use crate::event::{Event, EventRecord, EventType, Handle};

/// What the polling loop should do after a push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep polling; more records belong to this batch.
    Continue,
    /// Hand the queued batch to the reader before polling again.
    Yield,
}

#[derive(Debug)]
pub struct EventQueue {
    buf: Box<[u8]>,
    len: usize,
    count: usize,
    yield_threshold: usize,
}

impl EventQueue {
    pub fn new(capacity: usize, yield_threshold: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            count: 0,
            yield_threshold,
        }
    }

    /// Appends `record`.
    ///
    /// On `BufferTooSmall` nothing is appended and earlier records stay queued.
    pub fn push(&mut self, record: &EventRecord<'_>) -> CodecResult<Dispatch> {
        let ends_batch = match record.event {
            Event::MsgComplete | Event::MsgError => false,
            Event::NewSession { .. }
            | Event::SessionEstablished
            | Event::SessionError { .. }
            | Event::MsgReceived
            | Event::FdReady { .. } => true,
        };
        self.append(record, ends_batch)
    }

    /// Appends a `MsgReceived` record for the slot named by `handle`.
    pub fn push_msg_received(
        &mut self,
        handle: Handle,
        more_in_batch: bool,
    ) -> CodecResult<Dispatch> {
        self.append(&EventRecord::new(handle, Event::MsgReceived), !more_in_batch)
    }

    fn append(&mut self, record: &EventRecord<'_>, ends_batch: bool) -> CodecResult<Dispatch> {
        let written = encode(&mut self.buf[self.len..], record)?;
        self.len += written;
        self.count += 1;
        trace!(
            event = ?record.event_type(),
            handle = %record.handle,
            written,
            queued = self.len,
            "event queued"
        );

        if ends_batch || self.remaining() < self.yield_threshold {
            Ok(Dispatch::Yield)
        } else {
            Ok(Dispatch::Continue)
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of records currently queued.
    pub fn event_count(&self) -> usize {
        self.count
    }

    /// The queued records exactly as the host reads them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn reader(&self) -> EventReader<'_> {
        EventReader::new(self.as_bytes())
    }

    /// Forgets every queued record once the reader has consumed the batch.
    pub fn clear(&mut self) {
        self.len = 0;
        self.count = 0;
    }

    /// Counts queued records of type `ty`.
    pub fn count_of(&self, ty: EventType) -> usize {
        self.reader()
            .filter_map(Result::ok)
            .filter(|record| record.event_type() == ty)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::event::HEADER_LEN;

    #[test]
    fn received_batch_yields_on_last_message() {
        let mut queue = EventQueue::new(1024, 0);
        assert_eq!(
            queue.push_msg_received(Handle(1), true).unwrap(),
            Dispatch::Continue
        );
        assert_eq!(
            queue.push_msg_received(Handle(2), true).unwrap(),
            Dispatch::Continue
        );
        assert_eq!(
            queue.push_msg_received(Handle(3), false).unwrap(),
            Dispatch::Yield
        );
        assert_eq!(queue.event_count(), 3);
        assert_eq!(queue.len(), 3 * HEADER_LEN);

        let handles: Vec<_> = queue.reader().map(|r| r.unwrap().handle).collect();
        assert_eq!(handles, vec![Handle(1), Handle(2), Handle(3)]);
    }

    #[test]
    fn session_events_end_the_batch() {
        let mut queue = EventQueue::new(1024, 0);
        let established = EventRecord::new(Handle(5), Event::SessionEstablished);
        assert_eq!(queue.push(&established).unwrap(), Dispatch::Yield);
        let complete = EventRecord::new(Handle(6), Event::MsgComplete);
        assert_eq!(queue.push(&complete).unwrap(), Dispatch::Continue);
        assert_eq!(queue.count_of(EventType::MsgComplete), 1);
    }

    #[test]
    fn low_space_forces_yield() {
        let mut queue = EventQueue::new(4 * HEADER_LEN, 2 * HEADER_LEN);
        assert_eq!(
            queue.push_msg_received(Handle(1), true).unwrap(),
            Dispatch::Continue
        );
        assert_eq!(
            queue.push_msg_received(Handle(2), true).unwrap(),
            Dispatch::Continue
        );
        assert_eq!(
            queue.push_msg_received(Handle(3), true).unwrap(),
            Dispatch::Yield
        );
    }

    #[test]
    fn full_queue_keeps_earlier_records() {
        let mut queue = EventQueue::new(HEADER_LEN + 4, 0);
        queue.push_msg_received(Handle(1), true).unwrap();
        let before = queue.as_bytes().to_vec();

        let err = queue.push_msg_received(Handle(2), true).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferTooSmall {
                needed: HEADER_LEN,
                available: 4
            }
        );
        assert_eq!(queue.as_bytes(), before.as_slice());
        assert_eq!(queue.event_count(), 1);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.remaining(), queue.capacity());
    }
}
