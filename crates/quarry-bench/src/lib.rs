//! Shared configuration for the Quarry benchmarks.
//!
//! Workloads come from [`quarry_test_utils::fixtures`]; this crate only
//! fixes the facade sizing so every bench measures the same layout.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use quarry_arena::{MemoryConfig, PageType};

/// Bytes per facade arena in the benchmark configuration.
pub const ARENA_BYTES: usize = 8 * 1024 * 1024;

/// Three equal arenas, one per page type.
pub fn bench_config() -> MemoryConfig {
    let mut config = MemoryConfig::uniform(ARENA_BYTES, PageType::Medium);
    config.main.page_type = PageType::Large;
    config.temp.page_type = PageType::Small;
    config
}
