mod block;
mod buddy;

pub use block::BlockInfo;
pub use buddy::{AllocError, Allocation, Blocks, BuddyAllocator, ConfigError};
