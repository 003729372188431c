//! Error handling helpers for the message pool crate.
//!
//! The pool keeps its error surface small: configuration validation,
//! allocation, registration, and teardown failures. Exhaustion is not an error;
//! [`crate::MsgPool::acquire`] reports it as `None`.

use crate::dma::DmaError;
use std::fmt;

/// Convenience result alias for fallible pool operations.
pub type PoolResult<T, E = PoolError> = Result<T, E>;

#[derive(Debug)]
/// Errors surfaced while building or tearing down a [`crate::MsgPool`].
pub enum PoolError {
    /// The requested shape cannot describe a usable pool.
    InvalidConfig {
        slot_count: u32,
        in_size: usize,
        out_size: usize,
    },
    /// Allocation of the backing region failed for the given size/alignment pair.
    AllocationFailed { size: usize, alignment: usize },
    /// The fallback heap region could not be registered for DMA.
    RegistrationFailed { size: usize },
    /// Deregistering or freeing the region failed during teardown.
    Teardown(DmaError),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidConfig {
                slot_count,
                in_size,
                out_size,
            } => {
                write!(
                    f,
                    "invalid pool shape: {slot_count} slots of {in_size}+{out_size} bytes \
                     (need at least one slot, a non-empty stride, and a region that fits usize)"
                )
            }
            PoolError::AllocationFailed { size, alignment } => {
                write!(
                    f,
                    "failed to allocate pool region of {size} bytes aligned to {alignment}"
                )
            }
            PoolError::RegistrationFailed { size } => {
                write!(f, "failed to register {size} byte pool region for DMA")
            }
            PoolError::Teardown(err) => write!(f, "pool teardown failed: {err}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Teardown(err) => Some(err),
            _ => None,
        }
    }
}
