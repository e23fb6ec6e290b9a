//! Integration tests for the buddymem crate
//!
//! Drives complete allocate/deallocate scenarios through the
//! public API and checks the resulting tree shapes via the
//! traversal.

use buddymem::{AllocError, Allocation, BlockInfo, BuddyAllocator};

const TOTAL_SIZE: u64 = 1024;
const MIN_BLOCK_SIZE: u64 = 16;

fn new_allocator() -> BuddyAllocator {
    BuddyAllocator::new(TOTAL_SIZE, MIN_BLOCK_SIZE).unwrap()
}

/// Collect the traversal so tree shapes can be compared.
fn snapshot(allocator: &BuddyAllocator) -> Vec<BlockInfo> {
    allocator.blocks().collect()
}

/// Sum of the sizes of all leaves in a pre-order snapshot. A
/// node is a leaf when the next node is not deeper than it.
/// Leaves partitioning the range with no gaps or overlaps sum
/// exactly to the total size.
fn leaf_total(infos: &[BlockInfo]) -> u64 {
    infos
        .iter()
        .enumerate()
        .filter(|(i, info)| {
            infos
                .get(i + 1)
                .map_or(true, |next| next.depth <= info.depth)
        })
        .map(|(_, info)| info.size)
        .sum()
}

#[test]
fn test_allocation_rounds_and_splits() {
    let mut allocator = new_allocator();
    let allocation = allocator.allocate(100).unwrap();
    assert_eq!(
        allocation,
        Allocation {
            size: 128,
            offset: 0
        }
    );

    // The descent split the 1024 root into 512, 256 and 128
    // halves, so the tree now holds seven nodes.
    let infos = snapshot(&allocator);
    assert_eq!(infos.len(), 7);
    assert_eq!(leaf_total(&infos), TOTAL_SIZE);
}

#[test]
fn test_oversized_request_is_rejected() {
    let mut allocator = new_allocator();
    assert_eq!(
        allocator.allocate(2048),
        Err(AllocError::SizeExceedsCapacity)
    );

    // The failure left the tree untouched.
    assert_eq!(snapshot(&allocator).len(), 1);
}

#[test]
fn test_freed_space_can_serve_a_larger_request() {
    let mut allocator = new_allocator();
    let first = allocator.allocate(128).unwrap();
    assert_eq!(first.offset, 0);
    allocator.deallocate(0).unwrap();

    // The freed 128 block coalesced back up, so a 256 request
    // fits at the start of the range again.
    let second = allocator.allocate(256).unwrap();
    assert_eq!(
        second,
        Allocation {
            size: 256,
            offset: 0
        }
    );
}

#[test]
fn test_full_partition_and_exhaustion() {
    let mut allocator = new_allocator();
    let offsets: Vec<u64> = (0..4)
        .map(|_| allocator.allocate(256).unwrap().offset)
        .collect();
    assert_eq!(offsets, [0, 256, 512, 768]);

    assert_eq!(allocator.allocate(256), Err(AllocError::OutOfMemory));
    assert_eq!(allocator.used_size(), TOTAL_SIZE);
    assert_eq!(leaf_total(&snapshot(&allocator)), TOTAL_SIZE);
}

#[test]
fn test_deallocation_in_any_order_coalesces_fully() {
    let mut allocator = new_allocator();
    for _ in 0..4 {
        allocator.allocate(256).unwrap();
    }

    for offset in [512, 0, 768, 256] {
        allocator.deallocate(offset).unwrap();
    }

    let infos = snapshot(&allocator);
    assert_eq!(infos.len(), 1);
    assert!(infos[0].is_free);
    assert_eq!(infos[0].size, TOTAL_SIZE);
    assert_eq!(allocator.used_size(), 0);
}

#[test]
fn test_round_trip_restores_the_tree_shape() {
    let mut allocator = new_allocator();
    // An unrelated allocation stays in place across the round
    // trip, pinning part of the tree.
    allocator.allocate(64).unwrap();
    let before = snapshot(&allocator);

    let allocation = allocator.allocate(32).unwrap();
    allocator.deallocate(allocation.offset).unwrap();

    assert_eq!(snapshot(&allocator), before);
}

#[test]
fn test_double_free_is_reported() {
    let mut allocator = new_allocator();
    let allocation = allocator.allocate(100).unwrap();
    assert!(allocator.deallocate(allocation.offset).is_ok());
    assert_eq!(
        allocator.deallocate(allocation.offset),
        Err(AllocError::BlockNotFound)
    );
}

#[test]
fn test_merge_cascades_through_three_levels() {
    let mut allocator = new_allocator();
    // A 128 block at offset 0 sits three splits below the root.
    allocator.allocate(128).unwrap();
    assert_eq!(snapshot(&allocator).len(), 7);

    // Freeing it must merge the 128, 256 and 512 pairs in turn,
    // all the way back to a single unsplit root.
    allocator.deallocate(0).unwrap();
    let infos = snapshot(&allocator);
    assert_eq!(infos.len(), 1);
    assert_eq!(
        (infos[0].depth, infos[0].size, infos[0].is_free),
        (0, TOTAL_SIZE, true)
    );
}

#[test]
fn test_never_allocated_offset_is_reported() {
    let mut allocator = new_allocator();
    assert_eq!(allocator.deallocate(128), Err(AllocError::BlockNotFound));

    allocator.allocate(100).unwrap();
    // Interior offsets of an allocated block do not name it.
    assert_eq!(allocator.deallocate(64), Err(AllocError::BlockNotFound));
}

#[test]
fn test_fragmentation_and_reuse() {
    let mut allocator = new_allocator();
    let mut allocations = Vec::new();
    for _ in 0..8 {
        allocations.push(allocator.allocate(64).unwrap());
    }

    // Free every other block, leaving 64 unit holes behind.
    for allocation in allocations.iter().step_by(2) {
        allocator.deallocate(allocation.offset).unwrap();
    }

    // A new 64 request fits the first hole, and the leaves
    // still partition the whole range.
    let refill = allocator.allocate(64).unwrap();
    assert_eq!(refill.offset, 0);
    assert_eq!(leaf_total(&snapshot(&allocator)), TOTAL_SIZE);
}

#[test]
fn test_stress_rounds_return_to_empty() {
    let mut allocator = new_allocator();
    for _ in 0..5 {
        let mut allocations = Vec::new();
        for size in [8, 32, 128, 16, 64, 256, 16, 32] {
            allocations.push(allocator.allocate(size).unwrap());
        }

        // Deallocate in reverse order
        while let Some(allocation) = allocations.pop() {
            allocator.deallocate(allocation.offset).unwrap();
        }

        assert_eq!(allocator.used_size(), 0);
        assert_eq!(snapshot(&allocator).len(), 1);
    }
}
