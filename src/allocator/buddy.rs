use std::collections::HashMap;

use log::{debug, info};
use thiserror::Error;

use super::block::{Block, BlockId, BlockInfo};

// The macro will create an error type with a Display impl that
// prints the given string.
#[derive(Error, Debug)]
#[error("Invalid configuration: {0}.")]
pub struct ConfigError(pub &'static str);

/// Failure modes of the public operations. None of them leave
/// the tree in a partially mutated state: an operation either
/// fully succeeds or fails with the tree untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The rounded request is larger than the whole managed
    /// range.
    #[error("requested size exceeds total memory")]
    SizeExceedsCapacity,
    /// No sufficiently large free or splittable block is left.
    #[error("not enough memory to allocate")]
    OutOfMemory,
    /// No allocated block starts at the given offset.
    #[error("no allocated block at the given offset")]
    BlockNotFound,
    /// Allocation requests must be at least one unit.
    #[error("requested size must be at least 1")]
    InvalidRequest,
}

/// Handle returned for a successful allocation. It names the
/// block by its rounded size and start offset, and carries no
/// access to the tree itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Size the request was rounded up to.
    pub size: u64,
    /// Offset of the allocated block within the managed range.
    pub offset: u64,
}

/// Buddy-system allocator over a fixed range of abstract memory
/// units. The range is split on demand into power-of-two blocks
/// arranged as a binary tree, and freed buddies are coalesced
/// back together on deallocation.
pub struct BuddyAllocator {
    /// All blocks of the tree, indexed by id. The allocator is
    /// the sole owner; ids never escape to callers.
    blocks: HashMap<BlockId, Block>,
    /// Id of the root block spanning the whole range.
    root: BlockId,
    /// Floor below which blocks are never split.
    min_block_size: u64,
    /// Size of the whole managed range.
    total_size: u64,
    /// Id to assign to the next block created by a split.
    id_counter: BlockId,
    /// Number of units currently allocated.
    allocated: u64,
}

impl BuddyAllocator {
    pub fn new(total_size: u64, min_block_size: u64) -> Result<Self, ConfigError> {
        // Reject the configurations under which halving could
        // not keep every block size a power of two.
        if total_size == 0 || !total_size.is_power_of_two() {
            return Err(ConfigError("total size must be a nonzero power of two"));
        }
        if min_block_size == 0 || !min_block_size.is_power_of_two() {
            return Err(ConfigError("minimum block size must be a nonzero power of two"));
        }
        if min_block_size > total_size {
            return Err(ConfigError("minimum block size cannot exceed the total size"));
        }

        // The tree starts as a single free leaf covering the
        // whole range. Child blocks are only created once an
        // allocation demands a split.
        let root = 0;
        let blocks = HashMap::from([(root, Block::new(total_size, 0, None))]);

        info!(
            "initialized buddy allocator: {} units total, {} units minimum block",
            total_size, min_block_size
        );

        Ok(Self {
            blocks,
            root,
            min_block_size,
            total_size,
            id_counter: root + 1,
            allocated: 0,
        })
    }

    /// Size of the whole managed range.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Configured floor for block sizes.
    pub fn min_block_size(&self) -> u64 {
        self.min_block_size
    }

    /// Number of units currently allocated.
    pub fn used_size(&self) -> u64 {
        self.allocated
    }

    /// Number of units not currently allocated.
    pub fn available_size(&self) -> u64 {
        self.total_size - self.allocated
    }

    /// Allocates a block of at least `size` units and returns
    /// its handle. The served size is `size` rounded up to a
    /// power of two, and never below the configured minimum.
    pub fn allocate(&mut self, size: u64) -> Result<Allocation, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidRequest);
        }

        let request = size.next_power_of_two().max(self.min_block_size);
        if request > self.total_size {
            return Err(AllocError::SizeExceedsCapacity);
        }

        // First-fit search from the root, splitting free leaves
        // on the way down as needed.
        let id = self
            .allocate_block(self.root, request)
            .ok_or(AllocError::OutOfMemory)?;

        let block = *self.block(id);
        self.allocated += block.size;
        debug!("allocated {} units at offset {}", block.size, block.offset);

        Ok(Allocation {
            size: block.size,
            offset: block.offset,
        })
    }

    fn allocate_block(&mut self, id: BlockId, request: u64) -> Option<BlockId> {
        let block = *self.block(id);

        // A subtree smaller than the request can never satisfy
        // it, whatever its state.
        if block.size < request {
            return None;
        }

        // An exact-size free leaf is the allocation itself. An
        // exact-size block that is used or split is a dead end,
        // since everything below it is smaller than the
        // request.
        if block.size == request {
            if block.is_free_leaf() {
                self.block_mut(id).is_free = false;
                return Some(id);
            }
            return None;
        }

        // Oversized split block: descend into the existing
        // halves, left before right, so placement stays
        // deterministic.
        if let Some((left, right)) = block.children {
            return self
                .allocate_block(left, request)
                .or_else(|| self.allocate_block(right, request));
        }

        // Oversized leaf. An allocated one cannot be touched;
        // a free one is split in half, and the search resumes
        // on the same node, which now has two halves to offer.
        if !block.is_free {
            return None;
        }
        self.split(id);
        self.allocate_block(id, request)
    }

    /// Splits an unsplit free block into two free buddies of
    /// half its size. The left one keeps the block's offset and
    /// the right one starts immediately after it.
    fn split(&mut self, id: BlockId) {
        let block = *self.block(id);
        let half = block.size / 2;

        let left = self.insert(Block::new(half, block.offset, Some(id)));
        let right = self.insert(Block::new(half, block.offset + half, Some(id)));

        let parent = self.block_mut(id);
        parent.children = Some((left, right));
        parent.is_free = false;

        debug!(
            "split {} unit block at offset {} into two {} unit buddies",
            block.size, block.offset, half
        );
    }

    /// Frees the allocated block starting at `offset` and
    /// coalesces free buddies back together as far up the tree
    /// as possible.
    pub fn deallocate(&mut self, offset: u64) -> Result<(), AllocError> {
        let id = self
            .find_allocated(self.root, offset)
            .ok_or(AllocError::BlockNotFound)?;

        let block = self.block_mut(id);
        block.is_free = true;
        let (size, parent) = (block.size, block.parent);
        self.allocated -= size;
        debug!("freed {} unit block at offset {}", size, offset);

        self.coalesce(parent);
        Ok(())
    }

    /// Walks the tree toward the block starting at `offset`. At
    /// every split node exactly one half covers the offset, so
    /// the path down is unique. The offset names an allocation
    /// only if it is the exact start of a leaf currently in
    /// use; free leaves and interior offsets are not found.
    fn find_allocated(&self, id: BlockId, offset: u64) -> Option<BlockId> {
        let block = self.block(id);
        match block.children {
            Some((left, right)) => {
                if offset < self.block(right).offset {
                    self.find_allocated(left, offset)
                } else {
                    self.find_allocated(right, offset)
                }
            }
            None if block.offset == offset && !block.is_free => Some(id),
            None => None,
        }
    }

    /// Collapses pairs of free buddy leaves back into their
    /// parent, starting at `start` and moving upward until a
    /// pair cannot merge or the root has been reached. The
    /// absorbed children are removed from the tree.
    fn coalesce(&mut self, start: Option<BlockId>) {
        let mut current = start;
        while let Some(id) = current {
            let block = *self.block(id);
            let (left, right) = match block.children {
                Some(children) => children,
                None => break,
            };
            if !(self.block(left).is_free_leaf() && self.block(right).is_free_leaf()) {
                break;
            }

            self.blocks.remove(&left);
            self.blocks.remove(&right);
            let merged = self.block_mut(id);
            merged.children = None;
            merged.is_free = true;

            debug!(
                "merged two {} unit buddies into {} unit block at offset {}",
                block.size / 2,
                block.size,
                block.offset
            );

            current = block.parent;
        }
    }

    /// Pre-order traversal of the tree, left child first. The
    /// iterator borrows the allocator, so a fresh one must be
    /// taken after any allocate or deallocate.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            allocator: self,
            stack: vec![(self.root, 0)],
        }
    }

    fn block(&self, id: BlockId) -> &Block {
        &self.blocks[&id]
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks.get_mut(&id).unwrap()
    }

    fn insert(&mut self, block: Block) -> BlockId {
        let id = self.id_counter;
        self.id_counter += 1;
        self.blocks.insert(id, block);
        id
    }
}

/// Iterator over the block tree in pre-order, yielding one
/// `BlockInfo` per node.
pub struct Blocks<'a> {
    allocator: &'a BuddyAllocator,
    /// Nodes still to visit, with their depths. The right child
    /// is pushed first so the left one is visited first.
    stack: Vec<(BlockId, usize)>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        let block = self.allocator.block(id);
        if let Some((left, right)) = block.children {
            self.stack.push((right, depth + 1));
            self.stack.push((left, depth + 1));
        }
        Some(BlockInfo {
            depth,
            size: block.size,
            is_free: block.is_free,
        })
    }
}
