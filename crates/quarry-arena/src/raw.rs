//! Low-level primitives for raw memory.
//!
//! This is the only module in the crate that contains `unsafe` code.
//! Everything else addresses memory through a [`RawBlock`] by byte
//! offset, and every offset is bounds-checked here before a pointer is
//! formed. Each `unsafe` block carries a `// SAFETY:` comment.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use indexmap::IndexMap;
use quarry_core::AllocError;

/// Smallest alignment handed to the platform allocator.
pub(crate) const MIN_PLATFORM_ALIGN: usize = 16;

/// An owned, zero-initialised block of platform memory.
///
/// The block is allocated once with a fixed size and alignment and
/// released on drop. Allocators hand out pointers into it; those
/// pointers stay valid for as long as the block lives.
pub(crate) struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    /// Reserve `size` zeroed bytes aligned to `align`.
    pub(crate) fn new_zeroed(size: usize, align: usize) -> Result<Self, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "block size must be non-zero".into(),
            });
        }
        let layout = Layout::from_size_align(size, align).map_err(|e| {
            AllocError::InvalidConfig {
                reason: format!("bad block layout ({size} bytes, align {align}): {e}"),
            }
        })?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Ok(Self { ptr, layout })
    }

    /// Size of the block in bytes.
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Address of the first byte.
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Pointer to the byte at `offset`. `offset == len` is allowed.
    ///
    /// # Panics
    ///
    /// Panics if `offset > len`.
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset <= self.len(),
            "offset {offset} outside block of {} bytes",
            self.len()
        );
        offset_ptr(self.ptr, offset)
    }

    /// Offset of `ptr` within the block, or `None` if it lies outside.
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.ptr.as_ptr() as usize;
        let offset = addr.checked_sub(base)?;
        (offset < self.len()).then_some(offset)
    }

    /// Whether `ptr` points inside the block.
    pub(crate) fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Set `len` bytes starting at `offset` to `value`.
    pub(crate) fn fill(&mut self, offset: usize, len: usize, value: u8) {
        self.check_range(offset, len);
        // SAFETY: the range was bounds-checked against the live allocation.
        unsafe { ptr::write_bytes(self.ptr.as_ptr().add(offset), value, len) }
    }

    /// Move `len` bytes from `src` to `dst`. The ranges may overlap.
    pub(crate) fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.check_range(src, len);
        self.check_range(dst, len);
        // SAFETY: both ranges lie inside the allocation; `ptr::copy`
        // tolerates overlap.
        unsafe {
            ptr::copy(
                self.ptr.as_ptr().add(src),
                self.ptr.as_ptr().add(dst),
                len,
            )
        }
    }

    /// Write `bytes` starting at `offset`.
    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.check_range(offset, bytes.len());
        // SAFETY: the destination range was bounds-checked; `bytes` is a
        // separate borrow and cannot alias the block through `&mut self`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len())
        }
    }

    /// Read `N` bytes starting at `offset`.
    pub(crate) fn read<const N: usize>(&self, offset: usize) -> [u8; N] {
        self.check_range(offset, N);
        let mut out = [0u8; N];
        // SAFETY: the source range was bounds-checked.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), N) }
        out
    }

    /// Shared view of `len` bytes starting at `offset`.
    #[cfg(test)]
    pub(crate) fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check_range(offset, len);
        // SAFETY: bounds-checked; the block is zero-initialised, so every
        // byte is initialised, and `&self` prevents writes through the block.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// Mutable view of `len` bytes starting at `offset`.
    #[cfg(test)]
    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        self.check_range(offset, len);
        // SAFETY: bounds-checked and initialised; `&mut self` makes the
        // view unique for its lifetime.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }

    fn check_range(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.len()),
            "range {offset}+{len} outside block of {} bytes",
            self.len()
        );
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with this exact layout
        // and is released exactly once.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// `base + offset` for a pointer known to stay inside one allocation.
pub(crate) fn offset_ptr(base: NonNull<u8>, offset: usize) -> NonNull<u8> {
    // SAFETY: callers pass offsets inside (or one past) the allocation
    // behind `base`, so the address cannot wrap around to null.
    unsafe { NonNull::new_unchecked(base.as_ptr().wrapping_add(offset)) }
}

/// The platform's native allocator, with a side table of live blocks.
///
/// Used by the memory facade before it is initialised and after it is
/// shut down. Rust's allocator needs the original layout to free a
/// block, so every live allocation is recorded by address. Blocks still
/// live when the heap is dropped are released.
#[derive(Default)]
pub(crate) struct PlatformHeap {
    live: IndexMap<usize, Layout>,
}

impl PlatformHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` zeroed bytes. Returns `None` for a zero size or an
    /// unrepresentable layout.
    pub(crate) fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align.max(MIN_PLATFORM_ALIGN)).ok()?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        self.live.insert(ptr.as_ptr() as usize, layout);
        Some(ptr)
    }

    /// Resize a block, preserving its contents up to the smaller size.
    ///
    /// The block keeps its alignment unless `align` asks for more, in
    /// which case it moves to a freshly aligned block.
    pub(crate) fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        align: usize,
    ) -> Option<NonNull<u8>> {
        if new_size == 0 {
            return None;
        }
        let key = ptr.as_ptr() as usize;
        let layout = *self.live.get(&key)?;
        if align > layout.align() {
            let moved = self.allocate(new_size, align)?;
            // SAFETY: both blocks are live, distinct, and at least
            // `min(old, new)` bytes long.
            unsafe {
                ptr::copy_nonoverlapping(
                    ptr.as_ptr(),
                    moved.as_ptr(),
                    layout.size().min(new_size),
                )
            };
            self.free(ptr);
            return Some(moved);
        }
        let new_layout = Layout::from_size_align(new_size, layout.align()).ok()?;
        // SAFETY: `ptr` is live and was allocated with `layout`; `new_size`
        // is non-zero and forms a valid layout with the same alignment.
        let raw = unsafe { alloc::realloc(ptr.as_ptr(), layout, new_size) };
        let new_ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));
        self.live.swap_remove(&key);
        self.live.insert(new_ptr.as_ptr() as usize, new_layout);
        Some(new_ptr)
    }

    /// Release a block. Returns its size, or `None` if it is not live here.
    pub(crate) fn free(&mut self, ptr: NonNull<u8>) -> Option<usize> {
        let layout = self.live.swap_remove(&(ptr.as_ptr() as usize))?;
        // SAFETY: the block was allocated with `layout` and has just been
        // removed from the live table, so it is released exactly once.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        Some(layout.size())
    }

    #[cfg(test)]
    pub(crate) fn size_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.live.get(&(ptr.as_ptr() as usize)).map(|l| l.size())
    }

    /// Number of live blocks.
    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Drop for PlatformHeap {
    fn drop(&mut self) {
        for (addr, layout) in self.live.drain(..) {
            // SAFETY: every entry is a live block allocated with its layout.
            unsafe { alloc::dealloc(addr as *mut u8, layout) }
        }
    }
}

/// Zero `size` bytes at `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for writes of `size` bytes.
pub unsafe fn zero_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: upheld by the caller.
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) }
}

/// Copy `size` bytes from `src` to `dst`.
///
/// # Safety
///
/// `src` must be valid for reads and `dst` for writes of `size` bytes,
/// and the two ranges must not overlap.
pub unsafe fn copy_memory(src: NonNull<u8>, dst: NonNull<u8>, size: usize) {
    // SAFETY: upheld by the caller.
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) }
}

/// Fill `size` bytes at `dst` with `value`.
///
/// # Safety
///
/// `dst` must be valid for writes of `size` bytes.
pub unsafe fn set_memory(dst: NonNull<u8>, value: u8, size: usize) {
    // SAFETY: upheld by the caller.
    unsafe { ptr::write_bytes(dst.as_ptr(), value, size) }
}
