//! Core types and traits for the Quarry engine allocators.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every allocator in the workspace: memory
//! tags and the arena kinds they dispatch to, chunk layout views and
//! page rounding rules, the allocation error type, and the
//! [`TaggedAllocator`] trait that engine containers are written against.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod layout;
pub mod tag;
pub mod traits;

pub use error::AllocError;
pub use layout::{ChunkInfo, ChunkState, PageRounding};
pub use tag::{ArenaKind, MemoryTag};
pub use traits::TaggedAllocator;
