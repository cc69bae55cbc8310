//! Core abstraction trait for tagged allocation.

use std::ptr::NonNull;

use crate::tag::MemoryTag;

/// The allocation surface engine containers are written against.
///
/// Implemented by the memory facade and by the dynamic sub-allocator, so
/// a dynamic array or hashtable can be generic over where its storage
/// comes from. All methods take `&mut self`: an allocator instance is
/// never shared between threads and never re-entered mid-call.
pub trait TaggedAllocator {
    /// Allocate `size` bytes aligned to `alignment`, tagged for accounting.
    ///
    /// Returns `None` for zero-size requests and for failures the
    /// implementation treats as recoverable.
    fn allocate(&mut self, size: usize, alignment: usize, tag: MemoryTag) -> Option<NonNull<u8>>;

    /// Resize an allocation previously returned by [`allocate`](Self::allocate).
    ///
    /// The returned pointer may equal `ptr` when the allocation could be
    /// grown in place. Contents up to the smaller of the old and new sizes
    /// are preserved.
    fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>>;

    /// Release an allocation previously returned by this allocator.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` was not returned by this allocator or was already
    /// freed.
    fn free(&mut self, ptr: NonNull<u8>);
}
