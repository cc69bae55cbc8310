//! Page-partition vocabulary shared by the page allocators.
//!
//! Both the page arena and the freelist partition their address range
//! into chunks: contiguous runs of pages that are either free or
//! reserved. [`ChunkInfo`] is the read-only view of one such run, used by
//! diagnostics and by the invariant checks in tests.

use std::fmt;

/// Whether a chunk is available for allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// Available to satisfy allocations.
    Free,
    /// Handed out to a caller.
    Reserved,
}

/// A contiguous run of pages sharing one state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkInfo {
    /// Index of the first page of the run.
    pub page_index: usize,
    /// Number of pages in the run. Never zero.
    pub page_count: usize,
    /// Free or reserved.
    pub state: ChunkState,
}

impl ChunkInfo {
    /// Shorthand for a free run.
    pub fn free(page_index: usize, page_count: usize) -> Self {
        Self {
            page_index,
            page_count,
            state: ChunkState::Free,
        }
    }

    /// Shorthand for a reserved run.
    pub fn reserved(page_index: usize, page_count: usize) -> Self {
        Self {
            page_index,
            page_count,
            state: ChunkState::Reserved,
        }
    }

    /// Whether the run is free.
    pub fn is_free(&self) -> bool {
        self.state == ChunkState::Free
    }

    /// One past the last page of the run.
    pub fn end(&self) -> usize {
        self.page_index + self.page_count
    }
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            ChunkState::Free => "FREE",
            ChunkState::Reserved => "RESERVED",
        };
        write!(f, "{state}({}, {})", self.page_index, self.page_count)
    }
}

/// How a byte size is rounded to a page count.
///
/// The page arena historically reserved one page more than the floor of
/// `size / page_size`, while the freelist used a plain ceiling. Both rules
/// are kept so each allocator can be configured explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PageRounding {
    /// `floor(size / page_size) + 1`: always at least one spare byte.
    Margin,
    /// `ceil(size / page_size)`: the minimal number of pages.
    #[default]
    Ceil,
}

impl PageRounding {
    /// Number of pages needed to hold `size` bytes.
    ///
    /// `page_size` must be non-zero.
    pub fn pages_for(self, size: usize, page_size: usize) -> usize {
        match self {
            Self::Margin => size / page_size + 1,
            Self::Ceil => size.div_ceil(page_size),
        }
    }
}
