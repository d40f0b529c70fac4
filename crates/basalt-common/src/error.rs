//! Error types for BasaltDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using BasaltError.
pub type Result<T> = std::result::Result<T, BasaltError>;

/// Errors that can occur in BasaltDB operations.
#[derive(Debug, Error)]
pub enum BasaltError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool exhausted, all frames pinned")]
    PoolExhausted,

    // Block device errors
    #[error("Page not found on device: {page_id}")]
    PageNotFound { page_id: PageId },

    // B+ tree page errors
    #[error("Invalid tree page kind: {found}")]
    InvalidPageKind { found: u8 },
}
