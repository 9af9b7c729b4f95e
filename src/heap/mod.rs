//! The boundary-tag allocator engine.
//!
//! The engine owns a simulated byte region and partitions it into blocks,
//! each framed by a header and a footer carrying the block size and its
//! allocation state. Allocation asks the configured free collection for a
//! fitting block, splits off the surplus when it is large enough to stand on
//! its own, and marks the block used. Freeing marks the block free and fuses
//! it with free neighbors in both directions, so that no two adjacent free
//! blocks ever survive an operation.
//!
//! All addresses handed out are payload offsets from the region base. With
//! 4-byte tags and a gapless partition starting at offset zero they share a
//! single alignment class: block starts are multiples of 8, payloads follow
//! one tag later.
mod free_list;
mod region;
mod tag;

pub use free_list::{FreeCollectionKind, Placement};
pub use tag::{MIN_BLOCK_SIZE, TAG_SIZE};

use free_list::FreeCollection;
use region::{BlockOffset, Region};
use tag::BoundaryTag;

use crate::config::Config;

use core::fmt;

use log::{debug, error};

/// A simulated address: the byte offset of an allocation's payload from the
/// region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);
impl Address {
    /// The payload offset from the region base.
    pub fn offset(self) -> usize {
        self.0
    }
}

/// An error reported by a heap operation.
///
/// All variants except [`Corruption`](HeapError::Corruption) are recoverable:
/// the operation had no effect and the heap is unchanged. Corruption means an
/// invariant no longer holds; the heap cannot be trusted and callers should
/// stop driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No free block is large enough for the request.
    OutOfMemory,
    /// The address does not refer to an allocated block's payload.
    InvalidFree,
    /// A region resize would leave the configured size bounds.
    RegionOutOfBounds,
    /// A region shrink would discard bytes that are not free.
    RegionBusy,
    /// A boundary tag or free-list invariant is violated.
    Corruption,
}
impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::OutOfMemory => "no free block large enough to satisfy the request",
            Self::InvalidFree => "address does not refer to an allocated block's payload",
            Self::RegionOutOfBounds => "region size adjustment out of bounds",
            Self::RegionBusy => "region shrink would discard allocated bytes",
            Self::Corruption => "boundary tags are inconsistent, the heap is corrupt",
        };
        f.write_str(message)
    }
}
impl std::error::Error for HeapError {}

/// The simulated heap: a byte region, the free collection tracking its free
/// blocks and the placement policy choosing among them.
pub struct Heap {
    region: Region,
    collection: FreeCollection,
    placement: Placement,
    minimum_size: usize,
    maximum_size: usize,
}
impl Heap {
    /// Create a heap for the given configuration, holding a single free
    /// block that spans the whole initial region.
    ///
    /// # Panics
    /// This function panics if the initial size is not a multiple of 8, is
    /// too small for a single block or exceeds the configured maximum.
    pub fn new(config: Config) -> Self {
        assert!(
            config.initial_size % 8 == 0,
            "initial region size has to be a multiple of 8"
        );
        assert!(
            config.initial_size >= MIN_BLOCK_SIZE,
            "initial region too small for a single block"
        );
        assert!(
            config.initial_size <= config.maximum_size,
            "initial region size exceeds the configured maximum"
        );

        let mut region = Region::new(config.initial_size);
        let mut collection = FreeCollection::new(config.free_collection);
        let spanning = region.last_block();
        collection.on_freed(&mut region, spanning);

        Self {
            region,
            collection,
            placement: config.placement,
            minimum_size: config.initial_size,
            maximum_size: config.maximum_size,
        }
    }

    /// The current region size in bytes.
    pub fn size(&self) -> usize {
        self.region.len()
    }

    /// The 32-bit word at a byte offset, as stored in the region. Used by
    /// the snapshot dumper.
    ///
    /// # Panics
    /// Panics if the word would read past the end of the region.
    pub fn word_at(&self, offset: usize) -> u32 {
        self.region.word_at(offset)
    }

    /// Allocate a block with room for `request` payload bytes.
    ///
    /// The block size is the request plus both tags, rounded up to a multiple
    /// of 8 with a floor of [`MIN_BLOCK_SIZE`]. If the chosen free block
    /// leaves a remainder that can stand on its own, it is split and the
    /// remainder stays free; a smaller surplus is left inside the block as
    /// internal fragmentation.
    pub fn allocate(&mut self, request: usize) -> Result<Address, HeapError> {
        let required = required_block_size(request).ok_or(HeapError::OutOfMemory)?;
        let block = self
            .collection
            .find(&self.region, required, self.placement)
            .ok_or_else(|| {
                debug!("no free block of {required} bytes for a {request}-byte request");
                HeapError::OutOfMemory
            })?;

        let found = self.region.header(block).size();
        if found - required >= MIN_BLOCK_SIZE {
            self.region
                .write_block(block.start(), BoundaryTag::free(required));
            let remainder = self
                .region
                .write_block(block.start() + required, BoundaryTag::free(found - required));
            self.collection
                .on_split(&mut self.region, block, remainder);
        }

        let size = self.region.header(block).size();
        self.collection.on_allocated(&mut self.region, block);
        self.region
            .write_block(block.start(), BoundaryTag::allocated(size));
        debug!(
            "allocated {request} bytes in a {size}-byte block at offset {}",
            block.start()
        );
        Ok(Address(block.payload()))
    }

    /// Release the allocation behind `address`.
    ///
    /// The freed block is fused with its successor and predecessor if those
    /// are free, rewriting both tags of the surviving block. Fails with
    /// [`HeapError::InvalidFree`] when the address does not point at the
    /// payload of an allocated block (out of range, mid-block, already free
    /// or with disagreeing tags).
    pub fn free(&mut self, address: Address) -> Result<(), HeapError> {
        let block = self.locate_allocated(address)?;
        let mut start = block;
        let mut size = self.region.header(block).size();
        self.region
            .write_block(start.start(), BoundaryTag::free(size));

        if let Some(successor) = self.region.successor(start) {
            if self.region.header(successor).is_free() {
                self.collection.on_coalesced(&mut self.region, successor);
                size += self.region.header(successor).size();
                self.region
                    .write_block(start.start(), BoundaryTag::free(size));
            }
        }

        if let Some(predecessor) = self.region.predecessor(start) {
            if self.region.header(predecessor).is_free() {
                self.collection.on_coalesced(&mut self.region, predecessor);
                size += self.region.header(predecessor).size();
                start = predecessor;
                self.region
                    .write_block(start.start(), BoundaryTag::free(size));
            }
        }

        self.collection.on_freed(&mut self.region, start);
        debug!(
            "freed the block at address {}, the surviving free block spans {size} bytes at offset {}",
            address.offset(),
            start.start()
        );
        Ok(())
    }

    /// Move an allocation to a block with room for `request` payload bytes.
    ///
    /// `None` behaves like a plain allocation, a zero request like a plain
    /// free (returning `None`). Otherwise a fresh block is allocated, the
    /// common payload prefix is copied over and the old block is released.
    /// If the fresh allocation fails, the old block is left untouched.
    pub fn reallocate(
        &mut self,
        address: Option<Address>,
        request: usize,
    ) -> Result<Option<Address>, HeapError> {
        let Some(address) = address else {
            return self.allocate(request).map(Some);
        };
        if request == 0 {
            self.free(address)?;
            return Ok(None);
        }

        let old_block = self.locate_allocated(address)?;
        let old_payload = self.region.header(old_block).size() - 2 * TAG_SIZE;

        let new_address = self.allocate(request)?;
        let new_block = self.locate_allocated(new_address)?;
        self.region
            .copy_payload(old_block, new_block, old_payload.min(request));
        self.free(address)?;
        Ok(Some(new_address))
    }

    /// Adjust the region size by `delta` bytes.
    ///
    /// The result has to stay a multiple of 8 within the configured bounds.
    /// Growth appends a trailing free block, fusing it with a free old tail.
    /// A shrink removes bytes from the trailing free block and fails with
    /// [`HeapError::RegionBusy`] when the discarded tail is not entirely
    /// free, or when the cut would leave a trailing free block too small to
    /// stand on its own.
    pub fn resize_region(&mut self, delta: isize) -> Result<(), HeapError> {
        let old = self.region.len();
        let new = old
            .checked_add_signed(delta)
            .filter(|n| n % 8 == 0 && (self.minimum_size..=self.maximum_size).contains(n))
            .ok_or(HeapError::RegionOutOfBounds)?;

        if new > old {
            self.grow_region(new - old)?;
        } else if new < old {
            self.shrink_region(old - new)?;
        }
        debug!("region resized from {old} to {new} bytes");
        Ok(())
    }

    fn grow_region(&mut self, delta: usize) -> Result<(), HeapError> {
        let tail = self.region.last_block();
        let tail_free = self.region.header(tail).is_free();
        if !tail_free && delta < MIN_BLOCK_SIZE {
            // the appended bytes cannot form a legal block of their own
            return Err(HeapError::RegionOutOfBounds);
        }

        let old_len = self.region.len();
        self.region.grow(delta);
        if tail_free {
            // enlarge the trailing free block in place; it stays tracked and
            // its list links are untouched
            let merged = self.region.header(tail).size() + delta;
            self.region
                .write_block(tail.start(), BoundaryTag::free(merged));
        } else {
            let new_tail = self.region.write_block(old_len, BoundaryTag::free(delta));
            self.collection.on_region_grown(&mut self.region, new_tail);
        }
        Ok(())
    }

    fn shrink_region(&mut self, cut: usize) -> Result<(), HeapError> {
        let tail = self.region.last_block();
        let header = self.region.header(tail);
        if !header.is_free() || header.size() < cut {
            return Err(HeapError::RegionBusy);
        }

        let keep = header.size() - cut;
        if keep != 0 && keep < MIN_BLOCK_SIZE {
            // the cut would leave a runt that no tag pair can describe
            return Err(HeapError::RegionBusy);
        }

        let new_len = self.region.len() - cut;
        if keep == 0 {
            self.collection.on_region_shrunk(&mut self.region, tail);
            self.region.truncate(new_len);
        } else {
            self.region.truncate(new_len);
            self.region
                .write_block(tail.start(), BoundaryTag::free(keep));
        }
        Ok(())
    }

    /// The payload bytes of the allocation behind `address`.
    ///
    /// The slice covers the block's full payload capacity, which may exceed
    /// the requested size by the rounding of [`allocate`](Self::allocate).
    pub fn payload(&self, address: Address) -> Result<&[u8], HeapError> {
        let block = self.locate_allocated(address)?;
        Ok(self.region.payload(block))
    }

    /// The payload bytes of the allocation behind `address`, mutably.
    pub fn payload_mut(&mut self, address: Address) -> Result<&mut [u8], HeapError> {
        let block = self.locate_allocated(address)?;
        Ok(self.region.payload_mut(block))
    }

    /// Walk the whole region and check every invariant: the blocks tile the
    /// region exactly, header and footer of each block agree, sizes are
    /// legal, no two adjacent blocks are free and the free collection tracks
    /// exactly the free blocks.
    ///
    /// A failure means the heap is corrupt; it is reported once here and the
    /// heap should not be driven any further.
    pub fn verify(&self) -> Result<(), HeapError> {
        let mut offset = 0;
        let mut previous_free = false;
        let mut free_blocks = Vec::new();
        while offset < self.region.len() {
            let Some(block) = self.region.block_at(offset) else {
                error!("no legal block at offset {offset}, the partition is torn");
                return Err(HeapError::Corruption);
            };
            let header = self.region.header(block);
            if header != self.region.footer(block) {
                error!("header and footer disagree for the block at offset {offset}");
                return Err(HeapError::Corruption);
            }
            if header.is_free() {
                if previous_free {
                    error!("adjacent free blocks at offset {offset}");
                    return Err(HeapError::Corruption);
                }
                free_blocks.push(offset);
            }
            previous_free = header.is_free();
            offset += header.size();
        }

        if !self.collection.is_consistent(&self.region, &free_blocks) {
            error!("the explicit free list disagrees with the region");
            return Err(HeapError::Corruption);
        }
        Ok(())
    }

    fn locate_allocated(&self, address: Address) -> Result<BlockOffset, HeapError> {
        let payload = address.0;
        if payload < TAG_SIZE {
            return Err(HeapError::InvalidFree);
        }
        let block = self
            .region
            .block_at(payload - TAG_SIZE)
            .ok_or(HeapError::InvalidFree)?;
        let header = self.region.header(block);
        if header != self.region.footer(block) || header.is_free() {
            return Err(HeapError::InvalidFree);
        }
        Ok(block)
    }
}

/// The block size needed for `request` payload bytes: request plus both
/// tags, rounded up to a multiple of 8, at least [`MIN_BLOCK_SIZE`]. `None`
/// on arithmetic overflow.
fn required_block_size(request: usize) -> Option<usize> {
    let with_tags = request.checked_add(2 * TAG_SIZE)?;
    let rounded = with_tags.checked_add(7)? & !7;
    Some(rounded.max(MIN_BLOCK_SIZE))
}
