use thiserror::Error;

use event_codec::{CodecError, Handle};
use msg_pool::PoolError;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("no live session or message for handle {0}")]
    UnknownHandle(Handle),

    #[error("failed to parse bridge configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid bridge configuration: {0}")]
    InvalidConfig(&'static str),
}
