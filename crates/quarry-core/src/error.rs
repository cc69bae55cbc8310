//! Allocation error types shared by every allocator in the workspace.
//!
//! Components report failures as [`AllocError`] values. Whether a given
//! failure is recoverable is decided by the caller: the memory facade
//! treats exhaustion and invalid frees as fatal, while a container built
//! directly on a sub-allocator may fall back to another allocator.

use std::error::Error;
use std::fmt;

/// Errors that can occur during allocator operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-byte request. The facade turns this into a silent `None`.
    ZeroSize,
    /// No free region is large enough for the request.
    CapacityExceeded {
        /// Number of bytes requested (after page rounding and padding).
        requested: usize,
        /// Number of free bytes left in the allocator.
        available: usize,
    },
    /// The chunk/node table is full, so a free region cannot be split.
    NodeCapacityExceeded {
        /// The fixed node capacity of the allocator.
        max_nodes: usize,
    },
    /// The requested alignment is not supported by this allocator.
    InvalidAlignment {
        /// The rejected alignment in bytes.
        alignment: usize,
    },
    /// The offset does not correspond to the start of a live allocation.
    InvalidFree {
        /// Byte offset of the rejected pointer within the allocator.
        offset: usize,
    },
    /// The pointer does not lie inside the allocator's block at all.
    ForeignPointer,
    /// The allocator could not be constructed with the given parameters.
    InvalidConfig {
        /// Description of the rejected parameter.
        reason: String,
    },
}

impl AllocError {
    /// Whether the error signals exhausted capacity (bytes or nodes).
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::NodeCapacityExceeded { .. }
        )
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-size allocation"),
            Self::CapacityExceeded {
                requested,
                available,
            } => {
                write!(
                    f,
                    "allocator capacity exceeded: requested {requested} bytes, {available} bytes free"
                )
            }
            Self::NodeCapacityExceeded { max_nodes } => {
                write!(f, "node table full ({max_nodes} nodes)")
            }
            Self::InvalidAlignment { alignment } => {
                write!(f, "unsupported alignment: {alignment}")
            }
            Self::InvalidFree { offset } => {
                write!(f, "no live allocation starts at offset {offset}")
            }
            Self::ForeignPointer => write!(f, "pointer does not belong to this allocator"),
            Self::InvalidConfig { reason } => write!(f, "invalid allocator config: {reason}"),
        }
    }
}

impl Error for AllocError {}
