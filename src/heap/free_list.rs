//! Free collections and placement policies.
//!
//! Both collection variants answer the same placement query and receive the
//! same notifications from the engine, so the allocator code does not care
//! which one is active. The implicit variant keeps no state of its own and
//! walks every block; the explicit variant threads a doubly linked list
//! through the payloads of free blocks.

use super::region::{BlockOffset, Region};
use super::tag::{MIN_BLOCK_SIZE, TAG_SIZE};

/// The placement policy: which fitting free block a request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The first fitting block in traversal order.
    FirstFit,
    /// The smallest fitting block; ties go to the earliest in traversal
    /// order.
    BestFit,
}

/// The free-collection variant selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeCollectionKind {
    /// No auxiliary state; placement scans all blocks address-ascending.
    Implicit,
    /// A doubly linked list through free-block payloads; placement scans in
    /// list order (LIFO insertion).
    Explicit,
}

/// The active free collection.
pub enum FreeCollection {
    Implicit,
    Explicit(ExplicitList),
}
impl FreeCollection {
    pub fn new(kind: FreeCollectionKind) -> Self {
        match kind {
            FreeCollectionKind::Implicit => Self::Implicit,
            FreeCollectionKind::Explicit => Self::Explicit(ExplicitList::new()),
        }
    }

    /// Find a free block of at least `required` bytes per the placement
    /// policy, or `None` if no free block is large enough.
    pub fn find(
        &self,
        region: &Region,
        required: usize,
        placement: Placement,
    ) -> Option<BlockOffset> {
        match self {
            Self::Implicit => {
                let free = region.blocks().filter(|b| region.header(*b).is_free());
                select(region, free, required, placement)
            }
            Self::Explicit(list) => select(region, list.iter(region), required, placement),
        }
    }

    /// `block` has become free and is not yet tracked.
    pub fn on_freed(&mut self, region: &mut Region, block: BlockOffset) {
        if let Self::Explicit(list) = self {
            list.push_front(region, block);
        }
    }

    /// `block` has been placed and is no longer free.
    pub fn on_allocated(&mut self, region: &mut Region, block: BlockOffset) {
        if let Self::Explicit(list) = self {
            list.unlink(region, block);
        }
    }

    /// `original` has been shrunk in place and `remainder` is a new free
    /// block directly behind it. The original stays tracked, its links are
    /// untouched by the split.
    pub fn on_split(
        &mut self,
        region: &mut Region,
        _original: BlockOffset,
        remainder: BlockOffset,
    ) {
        if let Self::Explicit(list) = self {
            list.push_front(region, remainder);
        }
    }

    /// `absorbed` has been fused into a neighbor and no longer exists.
    pub fn on_coalesced(&mut self, region: &mut Region, absorbed: BlockOffset) {
        if let Self::Explicit(list) = self {
            list.unlink(region, absorbed);
        }
    }

    /// The region grew and `tail` is the (possibly merged) trailing free
    /// block, not yet tracked.
    pub fn on_region_grown(&mut self, region: &mut Region, tail: BlockOffset) {
        self.on_freed(region, tail);
    }

    /// The region is about to shrink and `removed` disappears entirely.
    pub fn on_region_shrunk(&mut self, region: &mut Region, removed: BlockOffset) {
        if let Self::Explicit(list) = self {
            list.unlink(region, removed);
        }
    }

    /// Whether the collection agrees with the region: every free block is
    /// tracked exactly once and nothing else is. `free_blocks` are the free
    /// block offsets in address order, as found by a region walk.
    pub fn is_consistent(&self, region: &Region, free_blocks: &[usize]) -> bool {
        let list = match self {
            Self::Implicit => return true,
            Self::Explicit(list) => list,
        };

        let mut seen = Vec::new();
        let mut prev = NIL;
        for block in list.iter(region) {
            let offset = block.start();
            if !free_blocks.contains(&offset) || seen.contains(&offset) {
                return false;
            }
            if ExplicitList::links(region, offset).0 != prev {
                return false;
            }
            seen.push(offset);
            prev = offset as u32;
        }
        seen.len() == free_blocks.len()
    }
}

fn select(
    region: &Region,
    candidates: impl Iterator<Item = BlockOffset>,
    required: usize,
    placement: Placement,
) -> Option<BlockOffset> {
    let mut fitting = candidates.filter(|b| region.header(*b).size() >= required);
    match placement {
        Placement::FirstFit => fitting.next(),
        Placement::BestFit => fitting.min_by_key(|b| region.header(*b).size()),
    }
}

/// Link word standing in for "no neighbor".
const NIL: u32 = u32::MAX;

/// The intrusive doubly linked list of the explicit collection.
///
/// Nodes live inside free-block payloads: the first payload word holds the
/// previous free block's offset, the second the next one's, [`NIL`] standing
/// in for none. Storing offsets instead of addresses keeps the links valid
/// when the backing storage moves on region growth. Insertion is LIFO at the
/// head; removal is O(1) through the links.
pub struct ExplicitList {
    head: Option<usize>,
}
impl ExplicitList {
    fn new() -> Self {
        Self { head: None }
    }

    fn links(region: &Region, block: usize) -> (u32, u32) {
        (
            region.word_at(block + TAG_SIZE),
            region.word_at(block + 2 * TAG_SIZE),
        )
    }

    fn set_prev(region: &mut Region, block: usize, prev: u32) {
        region.write_word(block + TAG_SIZE, prev);
    }

    fn set_next(region: &mut Region, block: usize, next: u32) {
        region.write_word(block + 2 * TAG_SIZE, next);
    }

    fn push_front(&mut self, region: &mut Region, block: BlockOffset) {
        let block = block.start();
        let next = self.head.map_or(NIL, |head| head as u32);
        Self::set_prev(region, block, NIL);
        Self::set_next(region, block, next);
        if let Some(head) = self.head {
            Self::set_prev(region, head, block as u32);
        }
        self.head = Some(block);
    }

    fn unlink(&mut self, region: &mut Region, block: BlockOffset) {
        let (prev, next) = Self::links(region, block.start());
        if prev == NIL {
            self.head = (next != NIL).then_some(next as usize);
        } else {
            Self::set_next(region, prev as usize, next);
        }
        if next != NIL {
            Self::set_prev(region, next as usize, prev);
        }
    }

    fn iter<'region>(&self, region: &'region Region) -> ListIter<'region> {
        ListIter {
            region,
            next: self.head,
            // upper bound on the list length; a corrupt cycle stops instead
            // of spinning and is reported by the consistency check
            remaining: region.len() / MIN_BLOCK_SIZE + 1,
        }
    }
}

struct ListIter<'region> {
    region: &'region Region,
    next: Option<usize>,
    remaining: usize,
}
impl Iterator for ListIter<'_> {
    type Item = BlockOffset;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let offset = self.next?;
        let block = self.region.block_at(offset)?;
        let (_, next) = ExplicitList::links(self.region, offset);
        self.next = (next != NIL).then_some(next as usize);
        Some(block)
    }
}
