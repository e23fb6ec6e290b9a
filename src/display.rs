use std::fmt::Write;

use crate::allocator::BuddyAllocator;

/// Renders the current block tree as indented text, one line
/// per node with four spaces of indentation per depth level.
/// The KB unit label is a rendering convention only; the
/// allocator itself is unit-agnostic.
pub fn render(allocator: &BuddyAllocator) -> String {
    let mut out = String::new();
    for block in allocator.blocks() {
        let status = if block.is_free { "free" } else { "used" };
        let indent = block.depth * 4;
        writeln!(out, "{:indent$}Block: {} KB, {}", "", block.size, status).unwrap();
    }
    out
}
