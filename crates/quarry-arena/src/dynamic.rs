//! Header-based dynamic sub-allocator.
//!
//! A [`DynamicAllocator`] pairs a [`Freelist`] (which pages are taken)
//! with a data block (where the bytes live). Each allocation stores a
//! three-byte header immediately before the pointer it hands out:
//!
//! ```text
//! | padding | alignment_offset: u16 LE | tag: u8 | user bytes ... |
//! ^ freelist offset                            ^ returned pointer
//! ```
//!
//! `alignment_offset` is the padding inserted to align the user pointer,
//! so `ptr - HEADER_SIZE - alignment_offset` is always the freelist offset
//! of the reservation. `free` needs nothing but the pointer. Padding bytes
//! are filled with a value no tag encodes to, so a pointer into the
//! padding never decodes as a header.

use std::ptr::NonNull;

use quarry_core::{AllocError, MemoryTag, TaggedAllocator};

use crate::freelist::{Freelist, Relocation};
use crate::raw::{RawBlock, MIN_PLATFORM_ALIGN};

/// Bytes of bookkeeping stored in front of every allocation.
pub const HEADER_SIZE: usize = 3;

/// Fill byte for alignment padding. Not a valid tag.
const PADDING_BYTE: u8 = 0xFF;

/// Decoded allocation header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    alignment_offset: u16,
    tag: MemoryTag,
}

impl Header {
    fn encode(self) -> [u8; HEADER_SIZE] {
        let [lo, hi] = self.alignment_offset.to_le_bytes();
        [lo, hi, self.tag.into()]
    }
}

/// A live allocation resolved from its user pointer.
#[derive(Clone, Copy, Debug)]
struct Resolved {
    /// Freelist offset of the reservation.
    start: usize,
    /// Block offset of the user pointer.
    user: usize,
    header: Header,
}

/// General-purpose allocator over one fixed block, with per-allocation tags.
pub struct DynamicAllocator {
    freelist: Freelist,
    block: RawBlock,
}

impl DynamicAllocator {
    /// Create an allocator over `total_size` bytes split into
    /// `page_size`-byte pages, with room for `max_nodes` freelist nodes.
    ///
    /// A trailing partial page is not used.
    pub fn new(total_size: usize, page_size: usize, max_nodes: usize) -> Result<Self, AllocError> {
        let freelist = Freelist::for_buffer(total_size, page_size, max_nodes)?;
        let block = RawBlock::new_zeroed(freelist.total_bytes(), MIN_PLATFORM_ALIGN)?;
        Ok(Self { freelist, block })
    }

    /// Allocate `size` bytes aligned to `alignment`, tagged with `tag`.
    ///
    /// `alignment` must be a power of two no larger than `u16::MAX`.
    /// Memory is not zeroed.
    pub fn allocate(
        &mut self,
        size: usize,
        tag: MemoryTag,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        check_alignment(alignment)?;
        let padded = self.padded(size, alignment)?;
        let reservation = self.freelist.allocate(padded)?;
        let user = self.place(reservation.offset, alignment, tag);
        Ok(self.block.ptr_at(user))
    }

    /// Release an allocation and return the tag it was made with.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<MemoryTag, AllocError> {
        let found = self.resolve(ptr)?;
        self.freelist.free(found.start)?;
        Ok(found.header.tag)
    }

    /// Resize an allocation to `new_size` bytes aligned to `alignment`.
    ///
    /// Returns the same pointer when the reservation already covers the
    /// request. Otherwise the reservation is extended or moved and the
    /// user bytes (up to the smaller of the old capacity and `new_size`)
    /// are carried over. On failure the original allocation is intact.
    pub fn reallocate(
        &mut self,
        new_size: usize,
        ptr: NonNull<u8>,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        check_alignment(alignment)?;
        let found = self.resolve(ptr)?;
        let padded = self.padded(new_size, alignment)?;
        let reserved = self.freelist.reserved_size(found.start)?;
        let old_capacity = found.start + reserved - found.user;
        if old_capacity >= new_size && ptr.as_ptr() as usize % alignment == 0 {
            return Ok(ptr);
        }

        let target = match self.freelist.reallocate(found.start, padded)? {
            Relocation::InPlace(r) => r,
            Relocation::Moved { to, .. } => to,
        };
        let user = self.user_offset(target.offset, alignment);
        self.block
            .copy_within(found.user, user, old_capacity.min(new_size));
        self.write_header(target.offset, user, found.header.tag);
        Ok(self.block.ptr_at(user))
    }

    /// Tag stored with a live allocation.
    pub fn tag_of(&self, ptr: NonNull<u8>) -> Result<MemoryTag, AllocError> {
        Ok(self.resolve(ptr)?.header.tag)
    }

    /// Bytes usable at `ptr` without reallocating.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let found = self.resolve(ptr)?;
        let reserved = self.freelist.reserved_size(found.start)?;
        Ok(found.start + reserved - found.user)
    }

    /// Raise the freelist node capacity. Capacity never shrinks.
    pub fn grow_node_capacity(&mut self, max_nodes: usize) -> Result<(), AllocError> {
        let total = self.freelist.total_bytes();
        self.freelist.resize(total, max_nodes)
    }

    /// Bytes not currently reserved.
    pub fn free_space(&self) -> usize {
        self.freelist.free_bytes()
    }

    /// Bytes managed by the allocator.
    pub fn total_space(&self) -> usize {
        self.freelist.total_bytes()
    }

    /// Whether `ptr` lies inside the data block.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.block.contains(ptr)
    }

    /// The underlying page bookkeeping.
    pub fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    fn padded(&self, size: usize, alignment: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let slack = if alignment > 1 { alignment } else { 0 };
        size.checked_add(HEADER_SIZE + slack)
            .ok_or(AllocError::CapacityExceeded {
                requested: size,
                available: self.free_space(),
            })
    }

    /// Block offset of the first `alignment`-aligned address that leaves
    /// room for a header after `start`.
    fn user_offset(&self, start: usize, alignment: usize) -> usize {
        let base = self.block.base().as_ptr() as usize;
        let addr = base + start + HEADER_SIZE;
        addr.next_multiple_of(alignment) - base
    }

    fn place(&mut self, start: usize, alignment: usize, tag: MemoryTag) -> usize {
        let user = self.user_offset(start, alignment);
        self.write_header(start, user, tag);
        user
    }

    fn write_header(&mut self, start: usize, user: usize, tag: MemoryTag) {
        let padding = user - HEADER_SIZE - start;
        let alignment_offset =
            u16::try_from(padding).expect("alignment padding is below the u16 alignment limit");
        let header = Header {
            alignment_offset,
            tag,
        };
        self.block.fill(start, padding, PADDING_BYTE);
        self.block.write(user - HEADER_SIZE, &header.encode());
    }

    fn resolve(&self, ptr: NonNull<u8>) -> Result<Resolved, AllocError> {
        let user = self.block.offset_of(ptr).ok_or(AllocError::ForeignPointer)?;
        let invalid = AllocError::InvalidFree { offset: user };
        if user < HEADER_SIZE {
            return Err(invalid);
        }
        let [lo, hi, tag] = self.block.read::<HEADER_SIZE>(user - HEADER_SIZE);
        let alignment_offset = u16::from_le_bytes([lo, hi]);
        let tag = MemoryTag::from_u8(tag).ok_or(invalid.clone())?;
        // A real header's padding is below the pointer's alignment.
        let addr_align = 1usize << (ptr.as_ptr() as usize).trailing_zeros();
        if usize::from(alignment_offset) >= addr_align {
            return Err(invalid);
        }
        let start = (user - HEADER_SIZE)
            .checked_sub(usize::from(alignment_offset))
            .ok_or(invalid.clone())?;
        self.freelist.reserved_size(start).map_err(|_| invalid)?;
        Ok(Resolved {
            start,
            user,
            header: Header {
                alignment_offset,
                tag,
            },
        })
    }
}

fn check_alignment(alignment: usize) -> Result<(), AllocError> {
    if alignment.is_power_of_two() && alignment <= usize::from(u16::MAX) {
        Ok(())
    } else {
        Err(AllocError::InvalidAlignment { alignment })
    }
}

impl TaggedAllocator for DynamicAllocator {
    fn allocate(&mut self, size: usize, alignment: usize, tag: MemoryTag) -> Option<NonNull<u8>> {
        DynamicAllocator::allocate(self, size, tag, alignment).ok()
    }

    fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        DynamicAllocator::reallocate(self, new_size, ptr, alignment).ok()
    }

    fn free(&mut self, ptr: NonNull<u8>) {
        if let Err(e) = DynamicAllocator::free(self, ptr) {
            panic!("dynamic allocator: invalid free of {ptr:p}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::ChunkInfo;
    use quarry_test_utils::assert_partition;

    fn allocator() -> DynamicAllocator {
        DynamicAllocator::new(4096, 64, 64).unwrap()
    }

    impl DynamicAllocator {
        fn checked_view(&self, ptr: NonNull<u8>, len: usize) -> usize {
            let usable = self.usable_size(ptr).unwrap();
            assert!(len <= usable, "view of {len} bytes exceeds {usable} usable");
            self.block.offset_of(ptr).unwrap()
        }

        fn bytes(&self, ptr: NonNull<u8>, len: usize) -> &[u8] {
            let user = self.checked_view(ptr, len);
            self.block.bytes(user, len)
        }

        fn bytes_mut(&mut self, ptr: NonNull<u8>, len: usize) -> &mut [u8] {
            let user = self.checked_view(ptr, len);
            self.block.bytes_mut(user, len)
        }
    }

    #[test]
    fn free_returns_tag_and_restores_layout() {
        let mut dyn_alloc = allocator();
        let before = dyn_alloc.freelist().nodes();
        let p = dyn_alloc.allocate(40, MemoryTag::Texture, 16).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert_eq!(dyn_alloc.tag_of(p).unwrap(), MemoryTag::Texture);
        assert_eq!(dyn_alloc.free(p).unwrap(), MemoryTag::Texture);
        assert_eq!(dyn_alloc.freelist().nodes(), before);
    }

    #[test]
    fn header_sits_right_before_pointer() {
        let mut dyn_alloc = allocator();
        let p = dyn_alloc.allocate(10, MemoryTag::Entity, 1).unwrap();
        let user = dyn_alloc.block.offset_of(p).unwrap();
        assert_eq!(user, HEADER_SIZE);
        assert_eq!(
            dyn_alloc.block.read::<3>(0),
            [0, 0, u8::from(MemoryTag::Entity)]
        );
    }

    #[test]
    fn large_alignment_records_offset() {
        let mut dyn_alloc = allocator();
        let p = dyn_alloc.allocate(8, MemoryTag::Game, 256).unwrap();
        assert_eq!(p.as_ptr() as usize % 256, 0);
        let found = dyn_alloc.resolve(p).unwrap();
        assert_eq!(
            found.start + HEADER_SIZE + usize::from(found.header.alignment_offset),
            found.user
        );
        assert!(dyn_alloc.usable_size(p).unwrap() >= 8);
    }

    #[test]
    fn pointer_into_alignment_padding_is_not_an_allocation() {
        let mut dyn_alloc = allocator();
        let p = dyn_alloc.allocate(8, MemoryTag::Game, 256).unwrap();
        let start = dyn_alloc.resolve(p).unwrap().start;
        let inside_padding = dyn_alloc.block.ptr_at(start + HEADER_SIZE);
        assert!(matches!(
            dyn_alloc.free(inside_padding),
            Err(AllocError::InvalidFree { .. })
        ));
        assert_eq!(dyn_alloc.free(p).unwrap(), MemoryTag::Game);
    }

    #[test]
    fn distinct_allocations_do_not_overlap() {
        let mut dyn_alloc = allocator();
        let a = dyn_alloc.allocate(100, MemoryTag::Array, 8).unwrap();
        let b = dyn_alloc.allocate(100, MemoryTag::Array, 8).unwrap();
        dyn_alloc.bytes_mut(a, 100).fill(0xAA);
        dyn_alloc.bytes_mut(b, 100).fill(0xBB);
        assert!(dyn_alloc.bytes(a, 100).iter().all(|&x| x == 0xAA));
        assert_eq!(dyn_alloc.tag_of(b).unwrap(), MemoryTag::Array);
    }

    #[test]
    fn rejects_bad_alignment_and_zero_size() {
        let mut dyn_alloc = allocator();
        assert_eq!(
            dyn_alloc.allocate(8, MemoryTag::Unknown, 12).unwrap_err(),
            AllocError::InvalidAlignment { alignment: 12 }
        );
        assert_eq!(
            dyn_alloc.allocate(8, MemoryTag::Unknown, 1 << 16).unwrap_err(),
            AllocError::InvalidAlignment { alignment: 1 << 16 }
        );
        assert_eq!(
            dyn_alloc.allocate(0, MemoryTag::Unknown, 8).unwrap_err(),
            AllocError::ZeroSize
        );
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut dyn_alloc = DynamicAllocator::new(256, 64, 8).unwrap();
        let err = dyn_alloc.allocate(300, MemoryTag::Scene, 1).unwrap_err();
        assert!(err.is_exhaustion());
        assert_eq!(dyn_alloc.free_space(), 256);
    }

    #[test]
    fn invalid_frees_are_rejected() {
        let mut dyn_alloc = allocator();
        let p = dyn_alloc.allocate(32, MemoryTag::Ui, 1).unwrap();
        let mut other = allocator();
        assert_eq!(other.free(p).unwrap_err(), AllocError::ForeignPointer);
        let interior = dyn_alloc.block.ptr_at(dyn_alloc.block.offset_of(p).unwrap() + 4);
        assert!(matches!(
            dyn_alloc.free(interior),
            Err(AllocError::InvalidFree { .. })
        ));
        dyn_alloc.free(p).unwrap();
        assert!(dyn_alloc.free(p).is_err());
    }

    #[test]
    fn reallocate_within_reservation_keeps_pointer() {
        let mut dyn_alloc = allocator();
        let p = dyn_alloc.allocate(10, MemoryTag::String, 1).unwrap();
        assert_eq!(dyn_alloc.reallocate(50, p, 1).unwrap(), p);
    }

    #[test]
    fn reallocate_to_smaller_alignment_honours_size() {
        let mut dyn_alloc = DynamicAllocator::new(1024, 64, 16).unwrap();
        let p = dyn_alloc.allocate(8, MemoryTag::Game, 256).unwrap();
        let fence = dyn_alloc.allocate(8, MemoryTag::Unknown, 1).unwrap();
        dyn_alloc.bytes_mut(p, 8).copy_from_slice(&[5; 8]);
        let reserved = dyn_alloc
            .freelist()
            .reserved_size(dyn_alloc.resolve(p).unwrap().start)
            .unwrap();
        // Fits the reservation, but not the bytes left after the old padding.
        let request = reserved - HEADER_SIZE;
        assert!(dyn_alloc.usable_size(p).unwrap() < request);

        let q = dyn_alloc.reallocate(request, p, 1).unwrap();
        assert_ne!(p, q);
        assert!(dyn_alloc.usable_size(q).unwrap() >= request);
        assert_eq!(dyn_alloc.bytes(q, 8), &[5; 8]);
        dyn_alloc.bytes_mut(q, request).fill(0x11);
        assert_eq!(dyn_alloc.tag_of(q).unwrap(), MemoryTag::Game);
        assert_eq!(dyn_alloc.tag_of(fence).unwrap(), MemoryTag::Unknown);
    }

    #[test]
    fn reallocate_moves_and_preserves_contents() {
        let mut dyn_alloc = allocator();
        let a = dyn_alloc.allocate(40, MemoryTag::HashTable, 8).unwrap();
        let _fence = dyn_alloc.allocate(40, MemoryTag::Unknown, 8).unwrap();
        dyn_alloc.bytes_mut(a, 40).copy_from_slice(&[7u8; 40]);
        let b = dyn_alloc.reallocate(500, a, 8).unwrap();
        assert_ne!(a, b);
        assert_eq!(b.as_ptr() as usize % 8, 0);
        assert_eq!(dyn_alloc.bytes(b, 40), &[7u8; 40]);
        assert_eq!(dyn_alloc.tag_of(b).unwrap(), MemoryTag::HashTable);
        assert!(dyn_alloc.usable_size(b).unwrap() >= 500);
        assert_partition(
            &dyn_alloc.freelist().nodes(),
            dyn_alloc.freelist().pages_count(),
        );
    }

    #[test]
    fn reallocate_extends_in_place_when_followed_by_free_pages() {
        let mut dyn_alloc = allocator();
        let a = dyn_alloc.allocate(40, MemoryTag::DynArray, 1).unwrap();
        dyn_alloc.bytes_mut(a, 4).copy_from_slice(&[1, 2, 3, 4]);
        let b = dyn_alloc.reallocate(200, a, 1).unwrap();
        assert_eq!(a, b);
        assert_eq!(dyn_alloc.bytes(b, 4), &[1, 2, 3, 4]);
        assert_eq!(dyn_alloc.freelist().nodes()[0], ChunkInfo::reserved(0, 4));
    }

    #[test]
    fn reallocate_into_own_released_pages_keeps_bytes() {
        let mut dyn_alloc = DynamicAllocator::new(64 * 8, 64, 16).unwrap();
        let front = dyn_alloc.allocate(100, MemoryTag::Unknown, 1).unwrap();
        let a = dyn_alloc.allocate(60, MemoryTag::Bst, 1).unwrap();
        let _tail = dyn_alloc.allocate(300, MemoryTag::Unknown, 1).unwrap();
        dyn_alloc.free(front).unwrap();
        let pattern: Vec<u8> = (0..60).collect();
        dyn_alloc.bytes_mut(a, 60).copy_from_slice(&pattern);
        // Only pages 0..3 fit, and they overlap the old reservation.
        let b = dyn_alloc.reallocate(150, a, 1).unwrap();
        assert_eq!(dyn_alloc.block.offset_of(b), Some(HEADER_SIZE));
        assert_eq!(dyn_alloc.bytes(b, 60), pattern.as_slice());
        assert_eq!(dyn_alloc.tag_of(b).unwrap(), MemoryTag::Bst);
    }

    #[test]
    fn failed_reallocate_leaves_allocation_intact() {
        let mut dyn_alloc = DynamicAllocator::new(64 * 4, 64, 8).unwrap();
        let a = dyn_alloc.allocate(60, MemoryTag::Audio, 1).unwrap();
        let _b = dyn_alloc.allocate(60, MemoryTag::Audio, 1).unwrap();
        dyn_alloc.bytes_mut(a, 3).copy_from_slice(&[9, 8, 7]);
        let before = dyn_alloc.freelist().nodes();
        assert!(dyn_alloc.reallocate(1000, a, 1).unwrap_err().is_exhaustion());
        assert_eq!(dyn_alloc.freelist().nodes(), before);
        assert_eq!(dyn_alloc.bytes(a, 3), &[9, 8, 7]);
        assert_eq!(dyn_alloc.tag_of(a).unwrap(), MemoryTag::Audio);
    }

    #[test]
    fn grow_node_capacity_allows_more_splits() {
        let mut dyn_alloc = DynamicAllocator::new(64 * 8, 64, 2).unwrap();
        dyn_alloc.allocate(10, MemoryTag::Unknown, 1).unwrap();
        let err = dyn_alloc.allocate(10, MemoryTag::Unknown, 1).unwrap_err();
        assert_eq!(err, AllocError::NodeCapacityExceeded { max_nodes: 2 });
        dyn_alloc.grow_node_capacity(8).unwrap();
        dyn_alloc.allocate(10, MemoryTag::Unknown, 1).unwrap();
        assert!(dyn_alloc.grow_node_capacity(4).is_err());
    }

    #[test]
    fn usable_through_trait_object() {
        fn roundtrip(alloc: &mut dyn TaggedAllocator) {
            let p = alloc.allocate(24, 8, MemoryTag::KeyMap).unwrap();
            let q = alloc.reallocate(p, 48, 8).unwrap();
            alloc.free(q);
        }
        let mut dyn_alloc = allocator();
        roundtrip(&mut dyn_alloc);
        assert_eq!(dyn_alloc.free_space(), dyn_alloc.total_space());
    }

    #[test]
    #[should_panic(expected = "invalid free")]
    fn trait_free_panics_on_foreign_pointer() {
        let mut a = allocator();
        let mut b = allocator();
        let p = DynamicAllocator::allocate(&mut a, 8, MemoryTag::Unknown, 1).unwrap();
        TaggedAllocator::free(&mut b, p);
    }
}
