//! Glue between transport callbacks and the host-visible event queue.
//!
//! * [`HandleRegistry`] – generational table turning host objects into opaque handles.
//! * [`TransportCallbacks`] – the notification surface the transport drives.
//! * [`EventBridge`] – owns the message pool and queue, implements the callbacks.
//! * [`BridgeConfig`] – serde/TOML settings for all of the above.

mod bridge;
mod callbacks;
mod config;
mod error;
mod registry;

pub use bridge::EventBridge;
pub use callbacks::TransportCallbacks;
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use registry::HandleRegistry;

pub use event_codec::{Dispatch, Handle, SessionEventKind};
