//! Test utilities for Quarry development.
//!
//! Invariant checkers shared by the allocator test modules, plus seeded
//! allocation workloads in [`fixtures`] for integration tests and
//! benchmarks.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use quarry_core::ChunkInfo;

pub use fixtures::{churn, replay, AllocOp};

/// Assert that `layout` exactly partitions `[0, total_pages)`.
///
/// Chunks must be in ascending order with no gaps or overlaps, none may
/// be empty, and no two neighbours may both be free.
pub fn assert_partition(layout: &[ChunkInfo], total_pages: usize) {
    assert!(!layout.is_empty(), "layout has no chunks");
    let mut expected = 0;
    for (i, chunk) in layout.iter().enumerate() {
        assert!(chunk.page_count > 0, "chunk {i} is empty: {chunk}");
        assert_eq!(
            chunk.page_index, expected,
            "chunk {i} starts at page {} but the previous chunk ends at {expected}",
            chunk.page_index
        );
        expected = chunk.end();
    }
    assert_eq!(
        expected, total_pages,
        "chunks cover {expected} pages, expected {total_pages}"
    );
    for pair in layout.windows(2) {
        assert!(
            !(pair[0].is_free() && pair[1].is_free()),
            "adjacent free chunks {} and {} were not merged",
            pair[0],
            pair[1]
        );
    }
}

/// Assert that no two `(start, len)` byte ranges overlap.
pub fn assert_disjoint(ranges: &[(usize, usize)]) {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (a, a_len) = pair[0];
        let (b, _) = pair[1];
        assert!(
            a + a_len <= b,
            "range {a:#x}+{a_len} overlaps range starting at {b:#x}"
        );
    }
}
