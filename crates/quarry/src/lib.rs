//! Quarry: the engine's memory allocator hierarchy.
//!
//! This is the top-level crate that re-exports the public API of the
//! Quarry sub-crates. Engine code normally allocates through a
//! [`MemorySystem`](arena::MemorySystem) and never touches the platform
//! allocator directly.
//!
//! # Quick start
//!
//! ```rust
//! use quarry::prelude::*;
//!
//! let mut memory = MemorySystem::new();
//! memory.initialize(MemoryConfig::default()).unwrap();
//!
//! let verts = memory.allocate(4096, MemoryTag::Renderer).unwrap();
//! let scratch = memory.allocate_aligned(256, 64, MemoryTag::Frame).unwrap();
//! assert_eq!(memory.allocation_count(), 2);
//!
//! memory.free(scratch);
//! memory.free(verts);
//! println!("{}", memory.usage_report());
//! memory.shutdown();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `quarry-core` | Tags, arena kinds, errors, the `TaggedAllocator` trait |
//! | [`arena`] | `quarry-arena` | Page arena, freelist, dynamic and linear allocators, facade |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Allocators and the memory facade (`quarry-arena`).
pub use quarry_arena as arena;

/// Tags, errors and the allocator trait (`quarry-core`).
pub use quarry_core as types;

/// Common imports for typical Quarry usage.
///
/// ```rust
/// use quarry::prelude::*;
/// ```
pub mod prelude {
    // Facade
    pub use quarry_arena::{ArenaSpec, MemoryConfig, MemoryStats, MemorySystem};

    // Sub-allocators
    pub use quarry_arena::{DynamicAllocator, Freelist, LinearAllocator, PageArena, PageType};

    // Core types and traits
    pub use quarry_core::{AllocError, ArenaKind, MemoryTag, TaggedAllocator};
}
