//! B+ tree page logic over buffer-pool frames.
//!
//! A tree page is a buffer-pool frame reinterpreted as one of two layouts,
//! discriminated by the kind byte in the shared header prefix. The tree-level
//! caller inspects the kind and dispatches statically; there is no virtual
//! dispatch.
//!
//! Internal page layout:
//! ```text
//! +------------------------+ 0
//! | Tree header (24 bytes) |
//! +------------------------+ 24
//! | key_0 (dummy) child_0  |
//! | key_1         child_1  |  key_i separates child_{i-1} and child_i
//! | ...                    |
//! +------------------------+
//! ```
//!
//! Leaf page layout:
//! ```text
//! +------------------------+ 0
//! | Tree header (24 bytes) |
//! +------------------------+ 24
//! | next_page_id + pad     |
//! +------------------------+ 32
//! | key_0  record_0        |  strictly ascending keys
//! | key_1  record_1        |
//! | ...                    |
//! +------------------------+
//! ```
//!
//! Keys are fixed-width byte strings compared by an externally supplied
//! comparator; entries are fixed-stride, so the layouts are stable across
//! reboots. Parent pointers are stored as identifiers and re-parenting on
//! entry movement goes through the buffer pool, which keeps the parent/child
//! reference cycle out of the ownership graph.

mod header;
mod internal;
mod key;
mod leaf;

pub use header::TreePageKind;
pub use internal::InternalPage;
pub use key::{compare_unsigned, IndexKey, RecordId};
pub use leaf::LeafPage;
