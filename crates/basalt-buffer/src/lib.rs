//! Buffer pool management for BasaltDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU eviction policy for cache management
//! - Pin counting for concurrent access
//! - Dirty page tracking with write-back to a block device

mod device;
mod frame;
mod pool;
mod replacer;

pub use device::{BlockDevice, MemoryDevice};
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PageReadGuard, PageWriteGuard};
pub use replacer::{LruReplacer, Replacer};
