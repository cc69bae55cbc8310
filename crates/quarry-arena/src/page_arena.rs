//! Self-contained page arena.
//!
//! A [`PageArena`] reserves one block of platform memory up front and
//! divides it into fixed-size pages. Allocations are whole runs of pages
//! chosen first-fit in address order; freeing a run coalesces it with its
//! free neighbours. The arena never grows and never touches the platform
//! allocator after creation.

use std::ptr::NonNull;

use quarry_core::{AllocError, ChunkInfo, PageRounding};

use crate::chunk::ChunkList;
use crate::raw::RawBlock;

/// Page granularity of an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageType {
    /// 64-byte pages, for many small allocations.
    Small,
    /// 128-byte pages.
    Medium,
    /// 1024-byte pages, for large buffers.
    Large,
}

impl PageType {
    /// Size of one page in bytes.
    pub const fn page_size(self) -> usize {
        match self {
            Self::Small => 64,
            Self::Medium => 128,
            Self::Large => 1024,
        }
    }
}

/// Tuning knobs for [`PageArena::with_options`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaOptions {
    /// Capacity of the chunk table. `None` picks
    /// `min(page_count, DEFAULT_MAX_CHUNKS)`.
    pub max_chunks: Option<usize>,
    /// How request sizes are rounded to pages.
    pub rounding: PageRounding,
}

impl ArenaOptions {
    /// Default upper bound on the chunk table size.
    pub const DEFAULT_MAX_CHUNKS: usize = 65_536;
}

/// Fixed-capacity arena of pages.
///
/// # Example
///
/// ```
/// use quarry_arena::{PageArena, PageType};
///
/// let mut arena = PageArena::new(192, PageType::Small).unwrap();
/// assert_eq!(arena.page_count(), 4);
///
/// let a = arena.allocate(64).unwrap();
/// let b = arena.allocate(64).unwrap();
/// assert_eq!(arena.offset_of(b), Some(64));
///
/// arena.free(a).unwrap();
/// arena.free(b).unwrap();
/// assert_eq!(arena.chunk_count(), 1);
/// ```
pub struct PageArena {
    page_size: usize,
    rounding: PageRounding,
    chunks: ChunkList,
    /// Backing memory, aligned to `page_size`.
    block: RawBlock,
}

impl PageArena {
    /// Create an arena able to hold at least `size` bytes.
    ///
    /// The page count is `size / page_size + 1`: the arena always carries
    /// one page of margin beyond the requested size.
    pub fn new(size: usize, page_type: PageType) -> Result<Self, AllocError> {
        Self::with_options(size, page_type, ArenaOptions::default())
    }

    /// Create an arena with explicit chunk capacity and rounding rule.
    pub fn with_options(
        size: usize,
        page_type: PageType,
        options: ArenaOptions,
    ) -> Result<Self, AllocError> {
        let page_size = page_type.page_size();
        let page_count = size / page_size + 1;
        let max_chunks = options
            .max_chunks
            .unwrap_or_else(|| page_count.min(ArenaOptions::DEFAULT_MAX_CHUNKS));
        let bytes = page_count
            .checked_mul(page_size)
            .ok_or(AllocError::InvalidConfig {
                reason: format!("arena of {page_count} pages overflows usize"),
            })?;

        let chunks = ChunkList::new(page_count, max_chunks)?;
        let block = RawBlock::new_zeroed(bytes, page_size)?;
        Ok(Self {
            page_size,
            rounding: options.rounding,
            chunks,
            block,
        })
    }

    /// Allocate `size` zeroed bytes, aligned to the page size.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(size, 1)
    }

    /// Allocate `size` zeroed bytes aligned to `alignment`.
    ///
    /// `alignment` must divide the page size or be a multiple of it.
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let offset = self.reserve(size, alignment)?;
        Ok(self.block.ptr_at(offset))
    }

    /// Release the allocation starting at `ptr`. Returns the bytes freed.
    ///
    /// Interior pointers and pointers that were already freed are
    /// rejected with [`AllocError::InvalidFree`].
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let idx = self.locate(ptr)?;
        Ok(self.chunks.release(idx) * self.page_size)
    }

    /// Resize the allocation at `ptr` to `new_size` bytes.
    ///
    /// Returns `ptr` unchanged when the chunk already holds `new_size`
    /// bytes. Otherwise a new region is allocated, the old contents are
    /// copied over and the old chunk is freed. On failure the original
    /// allocation is left untouched.
    pub fn reallocate(
        &mut self,
        new_size: usize,
        ptr: NonNull<u8>,
    ) -> Result<NonNull<u8>, AllocError> {
        self.reallocate_aligned(new_size, ptr, 1)
    }

    /// [`reallocate`](Self::reallocate) with an alignment requirement.
    pub(crate) fn reallocate_aligned(
        &mut self,
        new_size: usize,
        ptr: NonNull<u8>,
        alignment: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if new_size == 0 {
            return Err(AllocError::ZeroSize);
        }
        self.align_pages(alignment)?;
        let idx = self.locate(ptr)?;
        let old = self.chunks.info(idx);
        let old_offset = old.page_index * self.page_size;
        let capacity = old.page_count * self.page_size;
        if capacity >= new_size && ptr.as_ptr() as usize % alignment == 0 {
            return Ok(ptr);
        }

        let new_offset = self.reserve(new_size, alignment)?;
        self.block
            .copy_within(old_offset, new_offset, capacity.min(new_size));
        self.chunks.release(idx);
        Ok(self.block.ptr_at(new_offset))
    }

    /// Bytes reserved for the allocation at `ptr` (page-rounded).
    pub fn allocation_size(&self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let idx = self.locate(ptr)?;
        Ok(self.chunks.info(idx).page_count * self.page_size)
    }

    /// Whether `ptr` lies inside this arena's block.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.block.contains(ptr)
    }

    /// Byte offset of `ptr` from the arena base.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.block.offset_of(ptr)
    }

    /// Chunks in address order.
    pub fn layout(&self) -> Vec<ChunkInfo> {
        self.chunks.iter().collect()
    }

    /// Size of one page in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the arena.
    pub fn page_count(&self) -> usize {
        self.chunks.total_pages()
    }

    /// Total bytes managed by the arena.
    pub fn capacity(&self) -> usize {
        self.block.len()
    }

    /// Bytes currently reserved.
    pub fn used_bytes(&self) -> usize {
        self.capacity() - self.free_bytes()
    }

    /// Bytes currently free.
    pub fn free_bytes(&self) -> usize {
        self.chunks.free_pages() * self.page_size
    }

    /// Number of chunks in the chunk table.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Capacity of the chunk table.
    pub fn max_chunks(&self) -> usize {
        self.chunks.max_nodes()
    }

    /// Reserve and zero a page run; returns its byte offset.
    fn reserve(&mut self, size: usize, alignment: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align_pages = self.align_pages(alignment)?;
        let pages = self.rounding.pages_for(size, self.page_size);

        let fit = if align_pages == 1 {
            self.chunks.first_fit(pages).map(|i| (i, 0))
        } else {
            self.chunks.aligned_fit(pages, align_pages, self.base_page())
        };
        let (idx, padding) = fit.ok_or_else(|| AllocError::CapacityExceeded {
            requested: pages * self.page_size,
            available: self.free_bytes(),
        })?;

        let reserved = self.chunks.reserve(idx, padding, pages)?;
        let offset = self.chunks.info(reserved).page_index * self.page_size;
        self.block.fill(offset, pages * self.page_size, 0);
        Ok(offset)
    }

    /// Alignment expressed in pages. The block base is page-aligned, so
    /// any divisor of the page size is satisfied by every page.
    fn align_pages(&self, alignment: usize) -> Result<usize, AllocError> {
        if alignment == 0 {
            return Err(AllocError::InvalidAlignment { alignment });
        }
        if self.page_size % alignment == 0 {
            Ok(1)
        } else if alignment % self.page_size == 0 {
            Ok(alignment / self.page_size)
        } else {
            Err(AllocError::InvalidAlignment { alignment })
        }
    }

    /// Absolute page number of the block base. Page-multiple alignments
    /// are computed against real addresses, not arena offsets.
    fn base_page(&self) -> usize {
        self.block.base().as_ptr() as usize / self.page_size
    }

    /// Chunk index of the live allocation starting at `ptr`.
    fn locate(&self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let offset = self.block.offset_of(ptr).ok_or(AllocError::ForeignPointer)?;
        if offset % self.page_size != 0 {
            return Err(AllocError::InvalidFree { offset });
        }
        self.chunks
            .find(offset / self.page_size)
            .filter(|&i| !self.chunks.info(i).is_free())
            .ok_or(AllocError::InvalidFree { offset })
    }
}
