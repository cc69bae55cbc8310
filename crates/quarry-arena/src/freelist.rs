//! Page freelist decoupled from the memory it describes.
//!
//! A [`Freelist`] tracks which pages of some buffer are reserved, but
//! never holds the buffer itself. Allocations are reported as byte
//! offsets ([`AllocationRef`]) so the owner can place the bookkeeping
//! wherever it likes and relocate the data buffer without invalidating
//! it. The dynamic allocator pairs one freelist with one data block.

use quarry_core::{AllocError, ChunkInfo, PageRounding};

use crate::chunk::ChunkList;

/// A reservation inside the freelist's address range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocationRef {
    /// Byte offset of the first reserved byte. Always page-aligned.
    pub offset: usize,
    /// Reserved bytes (a whole number of pages).
    pub size: usize,
}

/// Outcome of [`Freelist::reallocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relocation {
    /// The reservation already covered the new size, or was extended
    /// into the free pages that follow it. Contents need no copy.
    InPlace(AllocationRef),
    /// The reservation moved. The old range is released but its bytes
    /// are untouched; the caller copies `from` to `to` before making any
    /// other allocation.
    Moved {
        /// The released reservation.
        from: AllocationRef,
        /// The new reservation.
        to: AllocationRef,
    },
}

/// First-fit page freelist with alignment support.
#[derive(Clone, Debug)]
pub struct Freelist {
    page_size: usize,
    chunks: ChunkList,
}

impl Freelist {
    /// Pages are always rounded up to the minimal count.
    const ROUNDING: PageRounding = PageRounding::Ceil;

    /// Create a freelist over `pages_count` pages of `page_size` bytes,
    /// holding at most `max_nodes` nodes.
    pub fn new(page_size: usize, pages_count: usize, max_nodes: usize) -> Result<Self, AllocError> {
        if page_size == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "page size must be non-zero".into(),
            });
        }
        Ok(Self {
            page_size,
            chunks: ChunkList::new(pages_count, max_nodes)?,
        })
    }

    /// Create a freelist covering the whole pages of a `buffer_len`-byte
    /// buffer.
    pub fn for_buffer(
        buffer_len: usize,
        page_size: usize,
        max_nodes: usize,
    ) -> Result<Self, AllocError> {
        if page_size == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "page size must be non-zero".into(),
            });
        }
        Self::new(page_size, buffer_len / page_size, max_nodes)
    }

    /// Reserve `ceil(size / page_size)` pages, first-fit.
    pub fn allocate(&mut self, size: usize) -> Result<AllocationRef, AllocError> {
        let pages = self.pages_for(size)?;
        let idx = self
            .chunks
            .first_fit(pages)
            .ok_or_else(|| self.exhausted(pages))?;
        let reserved = self.chunks.reserve(idx, 0, pages)?;
        Ok(self.reference(reserved))
    }

    /// Reserve pages starting at a multiple of `alignment` bytes.
    ///
    /// `alignment` must be 1 or a non-zero multiple of the page size;
    /// anything else is rejected with [`AllocError::InvalidAlignment`].
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<AllocationRef, AllocError> {
        if alignment == 1 {
            return self.allocate(size);
        }
        if alignment == 0 || alignment % self.page_size != 0 {
            return Err(AllocError::InvalidAlignment { alignment });
        }
        let pages = self.pages_for(size)?;
        let (idx, padding) = self
            .chunks
            .aligned_fit(pages, alignment / self.page_size, 0)
            .ok_or_else(|| self.exhausted(pages))?;
        let reserved = self.chunks.reserve(idx, padding, pages)?;
        Ok(self.reference(reserved))
    }

    /// Release the reservation starting at `offset`, merging it with free
    /// neighbours. Returns the number of pages freed.
    pub fn free(&mut self, offset: usize) -> Result<usize, AllocError> {
        let idx = self.locate(offset)?;
        Ok(self.chunks.release(idx))
    }

    /// Bytes actually reserved at `offset` (page-rounded).
    pub fn reserved_size(&self, offset: usize) -> Result<usize, AllocError> {
        let idx = self.locate(offset)?;
        Ok(self.chunks.info(idx).page_count * self.page_size)
    }

    /// Grow or move the reservation at `offset` to hold `new_size` bytes.
    ///
    /// Tries, in order: the existing reservation, extending into the free
    /// pages right after it, and finally releasing it and reserving a new
    /// first-fit range. Release and re-reservation happen in this one call,
    /// so no other allocation can observe or reuse the released pages
    /// before the caller copies them. If nothing fits, the original
    /// reservation is restored and the error returned.
    pub fn reallocate(&mut self, offset: usize, new_size: usize) -> Result<Relocation, AllocError> {
        let pages = self.pages_for(new_size)?;
        let idx = self.locate(offset)?;
        if self.chunks.try_extend(idx, pages) {
            return Ok(Relocation::InPlace(self.reference(idx)));
        }

        let from = self.reference(idx);
        let old = self.chunks.info(idx);
        self.chunks.release(idx);

        let reserved = match self.chunks.first_fit(pages) {
            Some(fit) => self.chunks.reserve(fit, 0, pages),
            None => Err(self.exhausted(pages)),
        };
        match reserved {
            Ok(to) => Ok(Relocation::Moved {
                from,
                to: self.reference(to),
            }),
            Err(err) => {
                self.chunks
                    .reserve_range(old.page_index, old.page_count)
                    .expect("a just-released range is free and needs no extra nodes");
                Err(err)
            }
        }
    }

    /// Extend the addressable range to `new_size` bytes and the node
    /// capacity to `new_max_nodes`.
    ///
    /// The last node grows if it is free; otherwise a free node is
    /// appended. Neither the range nor the capacity can shrink.
    pub fn resize(&mut self, new_size: usize, new_max_nodes: usize) -> Result<(), AllocError> {
        let new_pages = new_size / self.page_size;
        let current = self.chunks.total_pages();
        if new_pages < current {
            return Err(AllocError::InvalidConfig {
                reason: format!("freelist cannot shrink from {current} to {new_pages} pages"),
            });
        }
        self.chunks.set_max_nodes(new_max_nodes)?;
        self.chunks.grow(new_pages - current)
    }

    /// Nodes in address order.
    pub fn nodes(&self) -> Vec<ChunkInfo> {
        self.chunks.iter().collect()
    }

    /// Number of nodes in use.
    pub fn node_count(&self) -> usize {
        self.chunks.len()
    }

    /// Capacity of the node table.
    pub fn max_nodes(&self) -> usize {
        self.chunks.max_nodes()
    }

    /// Size of one page in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages covered.
    pub fn pages_count(&self) -> usize {
        self.chunks.total_pages()
    }

    /// Bytes covered.
    pub fn total_bytes(&self) -> usize {
        self.pages_count() * self.page_size
    }

    /// Bytes not currently reserved.
    pub fn free_bytes(&self) -> usize {
        self.chunks.free_pages() * self.page_size
    }

    fn pages_for(&self, size: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        Ok(Self::ROUNDING.pages_for(size, self.page_size))
    }

    fn locate(&self, offset: usize) -> Result<usize, AllocError> {
        if offset % self.page_size != 0 {
            return Err(AllocError::InvalidFree { offset });
        }
        self.chunks
            .find(offset / self.page_size)
            .filter(|&i| !self.chunks.info(i).is_free())
            .ok_or(AllocError::InvalidFree { offset })
    }

    fn reference(&self, idx: usize) -> AllocationRef {
        let info = self.chunks.info(idx);
        AllocationRef {
            offset: info.page_index * self.page_size,
            size: info.page_count * self.page_size,
        }
    }

    fn exhausted(&self, pages: usize) -> AllocError {
        AllocError::CapacityExceeded {
            requested: pages * self.page_size,
            available: self.free_bytes(),
        }
    }
}
