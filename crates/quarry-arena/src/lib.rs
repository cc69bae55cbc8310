//! Page arenas, freelists and the tagged memory facade.
//!
//! Every allocator here carves memory out of one block reserved up front
//! and never goes back to the platform allocator for more. The pieces
//! stack like this:
//!
//! ```text
//! MemorySystem (facade, dispatch by MemoryTag)
//! ├── PageArena × 3 (main / transient / temp)
//! │   └── ChunkList → page runs, first-fit, coalescing on free
//! └── PlatformHeap (fallback before initialize / after shutdown)
//!
//! DynamicAllocator (header-tagged, pointer API)
//! ├── Freelist → ChunkList (offset API, alignment, extend-or-move)
//! └── data block
//!
//! LinearAllocator (bump, reset-only)
//! ```
//!
//! # Safety
//!
//! All `unsafe` code lives in the private `raw` module, which owns the
//! platform blocks and bounds-checks every offset before forming a
//! pointer. The rest of the crate addresses memory through it. Pointers
//! handed out by an allocator are valid until they are freed or the
//! allocator is dropped, whichever comes first.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

mod chunk;
pub mod config;
pub mod dynamic;
pub mod freelist;
pub mod linear;
pub mod page_arena;
mod raw;
pub mod stats;
pub mod system;

// Public re-exports for the primary API surface.
pub use config::{ArenaSpec, ConfigError, MemoryConfig};
pub use dynamic::{DynamicAllocator, HEADER_SIZE};
pub use freelist::{AllocationRef, Freelist, Relocation};
pub use linear::LinearAllocator;
pub use page_arena::{ArenaOptions, PageArena, PageType};
pub use raw::{copy_memory, set_memory, zero_memory};
pub use stats::MemoryStats;
pub use system::MemorySystem;
