//! Seeded allocation workloads.
//!
//! A workload is a flat list of [`AllocOp`]s. Drivers keep a vector of
//! live pointers, push on `Allocate` and `swap_remove` on `Free`, so the
//! same seed replays the same fragmentation pattern against any
//! allocator.

use std::ptr::NonNull;

use quarry_core::{MemoryTag, TaggedAllocator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One step of a workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocOp {
    /// Allocate `size` bytes tagged `tag`.
    Allocate { size: usize, tag: MemoryTag },
    /// Free the live allocation at `pick % live.len()`; a no-op when
    /// nothing is live.
    Free { pick: usize },
}

/// A random mix of allocations and frees, biased towards allocation.
///
/// Sizes are uniform in `1..=max_size`, tags uniform over every tag.
pub fn churn(seed: u64, len: usize, max_size: usize) -> Vec<AllocOp> {
    assert!(max_size > 0, "max_size must be non-zero");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            if rng.random_bool(0.6) {
                AllocOp::Allocate {
                    size: rng.random_range(1..=max_size),
                    tag: MemoryTag::ALL[rng.random_range(0..MemoryTag::COUNT)],
                }
            } else {
                AllocOp::Free {
                    pick: rng.random_range(0..usize::MAX),
                }
            }
        })
        .collect()
}

/// Allocation sizes only, for throughput benchmarks.
pub fn sizes(seed: u64, len: usize, max_size: usize) -> Vec<usize> {
    assert!(max_size > 0, "max_size must be non-zero");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(1..=max_size)).collect()
}

/// Apply `ops` to `alloc` with 8-byte alignment, skipping allocations
/// that come back `None`, then free whatever is still live.
///
/// Returns the peak number of live allocations.
pub fn replay(alloc: &mut dyn TaggedAllocator, ops: &[AllocOp]) -> usize {
    let mut live: Vec<NonNull<u8>> = Vec::new();
    let mut peak = 0;
    for op in ops {
        match *op {
            AllocOp::Allocate { size, tag } => {
                if let Some(ptr) = alloc.allocate(size, 8, tag) {
                    live.push(ptr);
                    peak = peak.max(live.len());
                }
            }
            AllocOp::Free { pick } => {
                if !live.is_empty() {
                    alloc.free(live.swap_remove(pick % live.len()));
                }
            }
        }
    }
    for ptr in live {
        alloc.free(ptr);
    }
    peak
}
