//! Monotonic bump allocator.
//!
//! A [`LinearAllocator`] hands out consecutive slices of one buffer and
//! can only be reset as a whole. Allocation is a bounds check and an add;
//! there is no per-allocation free. Typical use is per-frame scratch data
//! that is discarded at the end of the frame with
//! [`free_all_data`](LinearAllocator::free_all_data).

use std::marker::PhantomData;
use std::ptr::NonNull;

use quarry_core::AllocError;

use crate::raw::{offset_ptr, RawBlock, MIN_PLATFORM_ALIGN};

enum Backing<'a> {
    Owned(RawBlock),
    Borrowed {
        base: NonNull<u8>,
        _buffer: PhantomData<&'a mut [u8]>,
    },
}

/// Bump allocator over an owned or borrowed buffer.
pub struct LinearAllocator<'a> {
    capacity: usize,
    allocated: usize,
    backing: Backing<'a>,
}

impl LinearAllocator<'static> {
    /// Create an allocator owning a fresh zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, AllocError> {
        let block = RawBlock::new_zeroed(capacity, MIN_PLATFORM_ALIGN)?;
        Ok(Self {
            capacity,
            allocated: 0,
            backing: Backing::Owned(block),
        })
    }
}

impl<'a> LinearAllocator<'a> {
    /// Create an allocator over a caller-provided buffer.
    ///
    /// The buffer stays borrowed for the allocator's lifetime and is not
    /// released on drop.
    pub fn with_buffer(buffer: &'a mut [u8]) -> Self {
        let capacity = buffer.len();
        Self {
            capacity,
            allocated: 0,
            backing: Backing::Borrowed {
                base: NonNull::from(buffer).cast(),
                _buffer: PhantomData,
            },
        }
    }

    /// Take the next `size` bytes.
    ///
    /// Returns `None` for a zero size, and `None` with an error log when
    /// the buffer cannot hold `size` more bytes.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, 1)
    }

    /// Take the next `size` bytes starting at a multiple of `alignment`.
    ///
    /// `alignment` must be a power of two. Padding skipped to reach the
    /// alignment counts as allocated.
    pub fn allocate_aligned(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        if !alignment.is_power_of_two() {
            tracing::error!(alignment, "linear allocator: alignment is not a power of two");
            return None;
        }
        let addr = self.base().as_ptr() as usize + self.allocated;
        let start = self.allocated + (addr.next_multiple_of(alignment) - addr);
        let end = start.checked_add(size).filter(|&end| end <= self.capacity);
        let Some(end) = end else {
            tracing::error!(
                requested = size,
                remaining = self.remaining(),
                capacity = self.capacity,
                "linear allocator: out of space"
            );
            return None;
        };
        self.allocated = end;
        Some(offset_ptr(self.base(), start))
    }

    /// Same as [`allocate`](Self::allocate) but with the failure reason.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let available = self.remaining();
        self.allocate(size).ok_or(AllocError::CapacityExceeded {
            requested: size,
            available,
        })
    }

    /// Forget every allocation. The buffer contents are left as they are.
    pub fn free_all_data(&mut self) {
        self.allocated = 0;
    }

    /// Size of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out since the last reset, including alignment padding.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.allocated
    }

    /// Whether the buffer is released when the allocator is dropped.
    pub fn owns_buffer(&self) -> bool {
        matches!(self.backing, Backing::Owned(_))
    }

    fn base(&self) -> NonNull<u8> {
        match &self.backing {
            Backing::Owned(block) => block.base(),
            Backing::Borrowed { base, .. } => *base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allocations_are_consecutive() {
        let mut linear = LinearAllocator::new(64).unwrap();
        let a = linear.allocate(10).unwrap();
        let b = linear.allocate(20).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 10);
        assert_eq!(linear.allocated(), 30);
        assert_eq!(linear.remaining(), 34);
        assert!(linear.owns_buffer());
    }

    #[test]
    fn overflow_returns_none_and_keeps_state() {
        let mut linear = LinearAllocator::new(32).unwrap();
        linear.allocate(30).unwrap();
        assert!(linear.allocate(3).is_none());
        assert_eq!(linear.allocated(), 30);
        assert!(linear.allocate(2).is_some());
        assert_eq!(linear.remaining(), 0);
        assert_eq!(
            linear.try_allocate(1).unwrap_err(),
            AllocError::CapacityExceeded {
                requested: 1,
                available: 0
            }
        );
    }

    #[test]
    fn zero_size_is_none() {
        let mut linear = LinearAllocator::new(8).unwrap();
        assert!(linear.allocate(0).is_none());
        assert_eq!(linear.try_allocate(0).unwrap_err(), AllocError::ZeroSize);
        assert_eq!(linear.allocated(), 0);
    }

    #[test]
    fn reset_does_not_zero() {
        let mut buffer = [0u8; 16];
        {
            let mut linear = LinearAllocator::with_buffer(&mut buffer);
            assert!(!linear.owns_buffer());
            let p = linear.allocate(4).unwrap();
            linear.free_all_data();
            assert_eq!(linear.allocated(), 0);
            let q = linear.allocate(4).unwrap();
            assert_eq!(p, q);
        }
        buffer[..4].copy_from_slice(&[1, 2, 3, 4]);
        let mut linear = LinearAllocator::with_buffer(&mut buffer);
        linear.allocate(8).unwrap();
        linear.free_all_data();
        linear.free_all_data();
        assert_eq!(linear.allocated(), 0);
        drop(linear);
        assert_eq!(&buffer[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn borrowed_pointers_land_in_buffer() {
        let mut buffer = [0u8; 32];
        let start = buffer.as_ptr() as usize;
        let mut linear = LinearAllocator::with_buffer(&mut buffer);
        let p = linear.allocate(8).unwrap();
        let q = linear.allocate(8).unwrap();
        assert_eq!(p.as_ptr() as usize, start);
        assert_eq!(q.as_ptr() as usize, start + 8);
        assert_eq!(linear.capacity(), 32);
    }

    #[test]
    fn aligned_allocation_pads() {
        let mut linear = LinearAllocator::new(128).unwrap();
        linear.allocate(3).unwrap();
        let p = linear.allocate_aligned(8, 16).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert_eq!(linear.allocated(), 24);
        assert!(linear.allocate_aligned(8, 12).is_none());
    }

    #[test]
    fn new_rejects_zero_capacity() {
        assert!(LinearAllocator::new(0).is_err());
    }

    proptest! {
        #[test]
        fn allocated_never_exceeds_capacity(
            capacity in 1usize..512,
            sizes in prop::collection::vec(0usize..64, 0..32),
        ) {
            let mut linear = LinearAllocator::new(capacity).unwrap();
            let mut total = 0usize;
            for size in sizes {
                if linear.allocate(size).is_some() {
                    total += size;
                }
                prop_assert!(linear.allocated() <= linear.capacity());
                prop_assert_eq!(linear.allocated(), total);
            }
        }
    }
}
