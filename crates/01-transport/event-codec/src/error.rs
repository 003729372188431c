use thiserror::Error;

use crate::event::EventField;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer too small: record needs {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("truncated record: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown event type {0}")]
    UnknownEventType(i32),

    #[error("invalid {field} length {len}")]
    InvalidLength { field: EventField, len: i32 },

    #[error("{field} is {len} bytes, longer than an int32 length prefix allows")]
    FieldTooLong { field: EventField, len: usize },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(EventField),
}
