//! Fixed-capacity chunk list shared by the page allocators.
//!
//! A [`ChunkList`] partitions `[0, total_pages)` into runs of pages that
//! are either free or reserved. Runs are nodes of an intrusive doubly
//! linked list stored in a slab and addressed by index, so splitting a
//! run or merging it with its neighbours is O(1). Finding a run by page
//! offset, or the first run that fits a request, is a linear walk in
//! address order.
//!
//! Invariants maintained by every operation:
//! - runs are in ascending page order with no gaps or overlaps;
//! - the page counts sum to `total_pages`;
//! - no run has zero pages;
//! - no two adjacent runs are both free.

use std::iter;

use quarry_core::{AllocError, ChunkInfo, ChunkState};

/// One run of pages in the slab.
#[derive(Clone, Copy, Debug)]
struct Node {
    page_index: usize,
    page_count: usize,
    state: ChunkState,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Index-addressed partition of a page range.
#[derive(Clone, Debug)]
pub(crate) struct ChunkList {
    /// Slab of nodes. Dead slots are listed in `vacant`.
    nodes: Vec<Node>,
    vacant: Vec<usize>,
    head: usize,
    tail: usize,
    live: usize,
    max_nodes: usize,
    total_pages: usize,
}

impl ChunkList {
    /// Create a list holding one free run over `total_pages`.
    pub(crate) fn new(total_pages: usize, max_nodes: usize) -> Result<Self, AllocError> {
        if total_pages == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "page count must be non-zero".into(),
            });
        }
        if max_nodes == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "node capacity must be non-zero".into(),
            });
        }
        let mut nodes = Vec::with_capacity(max_nodes.min(64));
        nodes.push(Node {
            page_index: 0,
            page_count: total_pages,
            state: ChunkState::Free,
            prev: None,
            next: None,
        });
        Ok(Self {
            nodes,
            vacant: Vec::new(),
            head: 0,
            tail: 0,
            live: 1,
            max_nodes,
            total_pages,
        })
    }

    /// Total pages partitioned by the list.
    pub(crate) fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Number of runs currently in the list.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Maximum number of runs the list can hold.
    pub(crate) fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Pages not currently reserved.
    pub(crate) fn free_pages(&self) -> usize {
        self.walk()
            .map(|i| &self.nodes[i])
            .filter(|n| n.state == ChunkState::Free)
            .map(|n| n.page_count)
            .sum()
    }

    /// Snapshot of run `idx`.
    pub(crate) fn info(&self, idx: usize) -> ChunkInfo {
        let n = &self.nodes[idx];
        ChunkInfo {
            page_index: n.page_index,
            page_count: n.page_count,
            state: n.state,
        }
    }

    /// Runs in address order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = ChunkInfo> + '_ {
        self.walk().map(|i| self.info(i))
    }

    /// First free run in address order holding at least `pages` pages.
    pub(crate) fn first_fit(&self, pages: usize) -> Option<usize> {
        self.walk().find(|&i| {
            let n = &self.nodes[i];
            n.state == ChunkState::Free && n.page_count >= pages
        })
    }

    /// First free run that can hold `pages` pages starting on a multiple
    /// of `align_pages`, counting pages from `origin`. Returns the run and
    /// the padding pages in front of the reservation.
    pub(crate) fn aligned_fit(
        &self,
        pages: usize,
        align_pages: usize,
        origin: usize,
    ) -> Option<(usize, usize)> {
        debug_assert!(align_pages > 0);
        self.walk().find_map(|i| {
            let n = &self.nodes[i];
            if n.state != ChunkState::Free {
                return None;
            }
            let start = origin.wrapping_add(n.page_index);
            let padding = (align_pages - start % align_pages) % align_pages;
            let usable = n.page_count.checked_sub(padding)?;
            (usable >= pages).then_some((i, padding))
        })
    }

    /// Run starting exactly at `page_index`.
    pub(crate) fn find(&self, page_index: usize) -> Option<usize> {
        self.walk()
            .take_while(|&i| self.nodes[i].page_index <= page_index)
            .find(|&i| self.nodes[i].page_index == page_index)
    }

    /// Reserve `pages` pages of free run `idx`, skipping `padding` pages.
    ///
    /// The run splits into up to three pieces:
    /// `[free padding][reserved][free remainder]`. Fails without touching
    /// the list if the slab cannot hold the extra nodes. Returns the index
    /// of the reserved run.
    pub(crate) fn reserve(
        &mut self,
        idx: usize,
        padding: usize,
        pages: usize,
    ) -> Result<usize, AllocError> {
        let node = self.nodes[idx];
        debug_assert_eq!(node.state, ChunkState::Free);
        debug_assert!(pages > 0 && padding + pages <= node.page_count);

        let remainder = node.page_count - padding - pages;
        let needed = usize::from(padding > 0) + usize::from(remainder > 0);
        if needed > self.spare_slots() {
            return Err(AllocError::NodeCapacityExceeded {
                max_nodes: self.max_nodes,
            });
        }

        let target = if padding > 0 {
            self.nodes[idx].page_count = padding;
            self.insert_after(
                idx,
                node.page_index + padding,
                pages + remainder,
                ChunkState::Free,
            )
        } else {
            idx
        };
        if remainder > 0 {
            self.nodes[target].page_count = pages;
            self.insert_after(
                target,
                node.page_index + padding + pages,
                remainder,
                ChunkState::Free,
            );
        }
        self.nodes[target].state = ChunkState::Reserved;
        Ok(target)
    }

    /// Reserve exactly `[page_index, page_index + page_count)`, which must
    /// lie inside a single free run.
    pub(crate) fn reserve_range(
        &mut self,
        page_index: usize,
        page_count: usize,
    ) -> Result<usize, AllocError> {
        let idx = self
            .walk()
            .find(|&i| {
                let n = &self.nodes[i];
                n.state == ChunkState::Free
                    && n.page_index <= page_index
                    && page_index + page_count <= n.page_index + n.page_count
            })
            .ok_or(AllocError::InvalidFree {
                offset: page_index,
            })?;
        let padding = page_index - self.nodes[idx].page_index;
        self.reserve(idx, padding, page_count)
    }

    /// Free reserved run `idx`, merging it with free neighbours.
    ///
    /// Returns the number of pages that were reserved.
    pub(crate) fn release(&mut self, idx: usize) -> usize {
        debug_assert_eq!(self.nodes[idx].state, ChunkState::Reserved);
        let freed = self.nodes[idx].page_count;
        self.nodes[idx].state = ChunkState::Free;

        if let Some(next) = self.nodes[idx].next {
            if self.nodes[next].state == ChunkState::Free {
                self.nodes[idx].page_count += self.nodes[next].page_count;
                self.unlink(next);
            }
        }
        if let Some(prev) = self.nodes[idx].prev {
            if self.nodes[prev].state == ChunkState::Free {
                self.nodes[prev].page_count += self.nodes[idx].page_count;
                self.unlink(idx);
            }
        }
        freed
    }

    /// Grow reserved run `idx` to `pages` pages by taking pages from the
    /// free run that follows it. Returns `false` if that run is missing,
    /// reserved, or too small.
    pub(crate) fn try_extend(&mut self, idx: usize, pages: usize) -> bool {
        let current = self.nodes[idx].page_count;
        if pages <= current {
            return true;
        }
        let Some(next) = self.nodes[idx].next else {
            return false;
        };
        let take = pages - current;
        let spare = self.nodes[next].page_count;
        if self.nodes[next].state != ChunkState::Free || spare < take {
            return false;
        }
        if spare == take {
            self.unlink(next);
        } else {
            self.nodes[next].page_index += take;
            self.nodes[next].page_count -= take;
        }
        self.nodes[idx].page_count = pages;
        true
    }

    /// Extend the partitioned range by `extra_pages` at the end.
    pub(crate) fn grow(&mut self, extra_pages: usize) -> Result<(), AllocError> {
        if extra_pages == 0 {
            return Ok(());
        }
        if self.nodes[self.tail].state == ChunkState::Free {
            self.nodes[self.tail].page_count += extra_pages;
        } else {
            if self.spare_slots() == 0 {
                return Err(AllocError::NodeCapacityExceeded {
                    max_nodes: self.max_nodes,
                });
            }
            self.insert_after(self.tail, self.total_pages, extra_pages, ChunkState::Free);
        }
        self.total_pages += extra_pages;
        Ok(())
    }

    /// Raise the node capacity. Capacity never shrinks.
    pub(crate) fn set_max_nodes(&mut self, max_nodes: usize) -> Result<(), AllocError> {
        if max_nodes < self.max_nodes {
            return Err(AllocError::InvalidConfig {
                reason: format!(
                    "node capacity cannot shrink (from {} to {max_nodes})",
                    self.max_nodes
                ),
            });
        }
        self.max_nodes = max_nodes;
        Ok(())
    }

    fn walk(&self) -> impl Iterator<Item = usize> + '_ {
        iter::successors(Some(self.head), move |&i| self.nodes[i].next)
    }

    fn spare_slots(&self) -> usize {
        self.max_nodes - self.live
    }

    fn insert_after(
        &mut self,
        at: usize,
        page_index: usize,
        page_count: usize,
        state: ChunkState,
    ) -> usize {
        let next = self.nodes[at].next;
        let node = Node {
            page_index,
            page_count,
            state,
            prev: Some(at),
            next,
        };
        let idx = match self.vacant.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.nodes[at].next = Some(idx);
        match next {
            Some(n) => self.nodes[n].prev = Some(idx),
            None => self.tail = idx,
        }
        self.live += 1;
        idx
    }

    fn unlink(&mut self, idx: usize) {
        let Node { prev, next, .. } = self.nodes[idx];
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => {
                self.head = next.expect("the list always keeps at least one run");
            }
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev.expect("the list always keeps at least one run"),
        }
        self.vacant.push(idx);
        self.live -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use quarry_test_utils::assert_partition;

    fn layout(list: &ChunkList) -> Vec<ChunkInfo> {
        list.iter().collect()
    }

    #[test]
    fn new_is_one_free_run() {
        let list = ChunkList::new(10, 8).unwrap();
        assert_eq!(layout(&list), vec![ChunkInfo::free(0, 10)]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.free_pages(), 10);
    }

    #[test]
    fn new_rejects_empty() {
        assert!(ChunkList::new(0, 8).is_err());
        assert!(ChunkList::new(8, 0).is_err());
    }

    #[test]
    fn reserve_splits_remainder() {
        let mut list = ChunkList::new(10, 8).unwrap();
        let idx = list.first_fit(3).unwrap();
        let r = list.reserve(idx, 0, 3).unwrap();
        assert_eq!(list.info(r), ChunkInfo::reserved(0, 3));
        assert_eq!(
            layout(&list),
            vec![ChunkInfo::reserved(0, 3), ChunkInfo::free(3, 7)]
        );
    }

    #[test]
    fn exact_fit_leaves_no_empty_run() {
        let mut list = ChunkList::new(4, 8).unwrap();
        let idx = list.first_fit(4).unwrap();
        list.reserve(idx, 0, 4).unwrap();
        assert_eq!(layout(&list), vec![ChunkInfo::reserved(0, 4)]);
        assert_eq!(list.first_fit(1), None);
    }

    #[test]
    fn padded_reserve_makes_three_pieces() {
        let mut list = ChunkList::new(10, 8).unwrap();
        let a = list.first_fit(1).unwrap();
        list.reserve(a, 0, 1).unwrap();
        let (idx, padding) = list.aligned_fit(2, 4, 0).unwrap();
        assert_eq!(padding, 3);
        list.reserve(idx, padding, 2).unwrap();
        assert_eq!(
            layout(&list),
            vec![
                ChunkInfo::reserved(0, 1),
                ChunkInfo::free(1, 3),
                ChunkInfo::reserved(4, 2),
                ChunkInfo::free(6, 4),
            ]
        );
    }

    #[test]
    fn reserve_fails_cleanly_when_slab_full() {
        let mut list = ChunkList::new(10, 1).unwrap();
        let idx = list.first_fit(2).unwrap();
        let err = list.reserve(idx, 0, 2).unwrap_err();
        assert_eq!(err, AllocError::NodeCapacityExceeded { max_nodes: 1 });
        assert_eq!(layout(&list), vec![ChunkInfo::free(0, 10)]);
        // An exact fit needs no extra node.
        list.reserve(idx, 0, 10).unwrap();
        assert_eq!(layout(&list), vec![ChunkInfo::reserved(0, 10)]);
    }

    #[test]
    fn sandwiched_release_merges_three_runs() {
        let mut list = ChunkList::new(9, 8).unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let i = list.first_fit(3).unwrap();
            ids.push(list.reserve(i, 0, 3).unwrap());
        }
        list.release(ids[0]);
        list.release(ids[2]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.release(ids[1]), 3);
        assert_eq!(layout(&list), vec![ChunkInfo::free(0, 9)]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn find_only_matches_run_starts() {
        let mut list = ChunkList::new(8, 8).unwrap();
        let i = list.first_fit(2).unwrap();
        let r = list.reserve(i, 0, 2).unwrap();
        assert_eq!(list.find(0), Some(r));
        assert!(list.find(1).is_none());
        assert!(list.find(2).is_some());
        assert!(list.find(100).is_none());
    }

    #[test]
    fn try_extend_absorbs_following_free_run() {
        let mut list = ChunkList::new(8, 8).unwrap();
        let i = list.first_fit(2).unwrap();
        let r = list.reserve(i, 0, 2).unwrap();
        assert!(list.try_extend(r, 5));
        assert_eq!(
            layout(&list),
            vec![ChunkInfo::reserved(0, 5), ChunkInfo::free(5, 3)]
        );
        assert!(list.try_extend(r, 8));
        assert_eq!(layout(&list), vec![ChunkInfo::reserved(0, 8)]);
        assert!(!list.try_extend(r, 9));
    }

    #[test]
    fn try_extend_refuses_reserved_neighbour() {
        let mut list = ChunkList::new(8, 8).unwrap();
        let a = list.first_fit(2).unwrap();
        let a = list.reserve(a, 0, 2).unwrap();
        let b = list.first_fit(2).unwrap();
        list.reserve(b, 0, 2).unwrap();
        assert!(!list.try_extend(a, 3));
        assert_eq!(list.info(a), ChunkInfo::reserved(0, 2));
    }

    #[test]
    fn reserve_range_restores_exact_run() {
        let mut list = ChunkList::new(10, 8).unwrap();
        let a = list.first_fit(2).unwrap();
        list.reserve(a, 0, 2).unwrap();
        let b = list.first_fit(3).unwrap();
        let b = list.reserve(b, 0, 3).unwrap();
        let before = layout(&list);
        list.release(b);
        list.reserve_range(2, 3).unwrap();
        assert_eq!(layout(&list), before);
    }

    #[test]
    fn grow_extends_free_tail_or_appends() {
        let mut list = ChunkList::new(4, 8).unwrap();
        list.grow(2).unwrap();
        assert_eq!(layout(&list), vec![ChunkInfo::free(0, 6)]);
        let i = list.first_fit(6).unwrap();
        list.reserve(i, 0, 6).unwrap();
        list.grow(3).unwrap();
        assert_eq!(
            layout(&list),
            vec![ChunkInfo::reserved(0, 6), ChunkInfo::free(6, 3)]
        );
        assert_eq!(list.total_pages(), 9);
    }

    #[test]
    fn max_nodes_never_shrinks() {
        let mut list = ChunkList::new(4, 8).unwrap();
        assert!(list.set_max_nodes(4).is_err());
        list.set_max_nodes(16).unwrap();
        assert_eq!(list.max_nodes(), 16);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Reserve { pages: usize, align: usize },
        Release { pick: usize },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..6, prop_oneof![Just(1usize), Just(2), Just(4)])
                .prop_map(|(pages, align)| Op::Reserve { pages, align }),
            any::<usize>().prop_map(|pick| Op::Release { pick }),
        ]
    }

    proptest! {
        #[test]
        fn partition_holds_under_random_ops(
            total in 1usize..64,
            max_nodes in 1usize..32,
            ops in prop::collection::vec(arb_op(), 0..64),
        ) {
            let mut list = ChunkList::new(total, max_nodes).unwrap();
            let mut reserved: Vec<usize> = Vec::new();
            for op in ops {
                match op {
                    Op::Reserve { pages, align } => {
                        if let Some((idx, padding)) = list.aligned_fit(pages, align, 0) {
                            if let Ok(r) = list.reserve(idx, padding, pages) {
                                let info = list.info(r);
                                prop_assert_eq!(info.page_index % align, 0);
                                prop_assert_eq!(info.page_count, pages);
                                reserved.push(info.page_index);
                            }
                        }
                    }
                    Op::Release { pick } => {
                        if !reserved.is_empty() {
                            let page = reserved.swap_remove(pick % reserved.len());
                            let idx = list.find(page).unwrap();
                            list.release(idx);
                        }
                    }
                }
                assert_partition(&layout(&list), total);
                prop_assert!(list.len() <= max_nodes);
            }
        }

        #[test]
        fn reserve_then_release_restores_layout(
            total in 2usize..64,
            first in 1usize..8,
            pages in 1usize..8,
        ) {
            let mut list = ChunkList::new(total, 16).unwrap();
            if let Some(i) = list.first_fit(first) {
                list.reserve(i, 0, first).unwrap();
            }
            let before = layout(&list);
            if let Some(i) = list.first_fit(pages) {
                let r = list.reserve(i, 0, pages).unwrap();
                list.release(r);
            }
            prop_assert_eq!(layout(&list), before);
        }
    }
}
