//! Storage engine for BasaltDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O (the block device implementation)
//! - B+ tree page logic: internal and leaf pages over buffer-pool frames
//! - Fixed-width index keys and record identifiers

mod btree;
mod disk;

pub use btree::{
    compare_unsigned, IndexKey, InternalPage, LeafPage, RecordId, TreePageKind,
};
pub use disk::{DiskManager, DiskManagerConfig};
