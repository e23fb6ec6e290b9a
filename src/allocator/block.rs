/// Unique identifier of a block within the allocator's tree.
pub type BlockId = u64;

/// Contiguous sub-range of the managed memory, represented as
/// one node of the block tree. A block is either a leaf (the
/// only unit of allocation) or has been split into exactly two
/// buddies of half its size.
#[derive(Clone, Copy)]
pub struct Block {
    /// Size of the block, a power of two in the same unit as
    /// the total managed size.
    pub size: u64,
    /// Offset of the block's first unit within the whole range.
    pub offset: u64,
    /// Whether the block is available for allocation. Only
    /// meaningful on leaves; a split block stays used until
    /// both halves have been coalesced back into it.
    pub is_free: bool,
    /// Id of the parent block, or `None` for the root. The
    /// relation is non-owning and only serves the upward merge
    /// cascade.
    pub parent: Option<BlockId>,
    /// Ids of the two halves the block was split into. Both
    /// are present or both are absent; a block never has a
    /// single child.
    pub children: Option<(BlockId, BlockId)>,
}

impl Block {
    pub fn new(size: u64, offset: u64, parent: Option<BlockId>) -> Self {
        Self {
            size,
            offset,
            is_free: true,
            parent,
            children: None,
        }
    }

    /// A leaf that is currently available, the only kind of
    /// block the merge rule may absorb.
    pub fn is_free_leaf(&self) -> bool {
        self.is_free && self.children.is_none()
    }
}

/// Snapshot of one tree node as produced by the pre-order
/// traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Depth of the node, with the root at 0.
    pub depth: usize,
    /// Size of the block.
    pub size: u64,
    /// Whether the block is free.
    pub is_free: bool,
}
