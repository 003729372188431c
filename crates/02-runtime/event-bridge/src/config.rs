//! Bridge settings, loadable from TOML.
//!
//! ```toml
//! event_queue_bytes = 65536
//! yield_threshold = 1024
//!
//! [pool]
//! slot_count = 256
//! in_size = 4096
//! out_size = 4096
//!
//! [dma]
//! huge_pages = false
//! ```

use serde::{Deserialize, Serialize};

use event_codec::{HEADER_LEN, MAX_FIXED_RECORD_LEN};
use msg_pool::{HostDmaConfig, PoolConfig};

use crate::error::{BridgeError, BridgeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub pool: PoolConfig,
    pub dma: HostDmaConfig,
    /// Capacity of the event queue shared with the host reader.
    pub event_queue_bytes: usize,
    /// Yield once fewer than this many queue bytes remain.
    pub yield_threshold: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            dma: HostDmaConfig::default(),
            event_queue_bytes: 64 * 1024,
            yield_threshold: 1024,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a TOML document; missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> BridgeResult<Self> {
        let config: BridgeConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.event_queue_bytes < HEADER_LEN {
            return Err(BridgeError::InvalidConfig(
                "event queue cannot hold a single record header",
            ));
        }
        if self.yield_threshold >= self.event_queue_bytes {
            return Err(BridgeError::InvalidConfig(
                "yield threshold must be below the event queue capacity",
            ));
        }
        if self.event_queue_bytes - self.yield_threshold < MAX_FIXED_RECORD_LEN {
            tracing::warn!(
                event_queue_bytes = self.event_queue_bytes,
                yield_threshold = self.yield_threshold,
                "every fixed-size record will force a yield"
            );
        }
        self.pool.region_len()?;
        Ok(())
    }
}
