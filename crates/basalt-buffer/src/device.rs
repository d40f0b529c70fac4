//! Block device contract for the buffer pool.

use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Contract for the underlying page store.
///
/// A block device reads and writes fixed-size pages by identifier and hands
/// out fresh identifiers on allocation. All four operations are synchronous
/// and may be invoked concurrently for different identifiers.
pub trait BlockDevice: Send + Sync {
    /// Fills `buf` with the page's current on-device bytes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Persists `buf` as the page's bytes.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Returns a fresh page identifier with space reserved for it.
    fn allocate_page(&self) -> Result<PageId>;

    /// Releases a page identifier.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
}

/// Heap-backed block device for tests and ephemeral databases.
///
/// Pages live in a hash map; deallocated identifiers are recycled before new
/// ones are handed out.
pub struct MemoryDevice {
    inner: Mutex<MemoryDeviceInner>,
}

struct MemoryDeviceInner {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    free: Vec<PageId>,
    next_page: u32,
}

impl MemoryDevice {
    /// Creates an empty in-memory device.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryDeviceInner {
                pages: HashMap::new(),
                free: Vec::new(),
                next_page: 0,
            }),
        }
    }

    /// Returns the number of allocated pages.
    pub fn num_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemoryDevice {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let inner = self.inner.lock();
        let page = inner
            .pages
            .get(&page_id)
            .ok_or(BasaltError::PageNotFound { page_id })?;
        buf.copy_from_slice(&**page);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let page = inner
            .pages
            .entry(page_id)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        page.copy_from_slice(buf);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_id = match inner.free.pop() {
            Some(pid) => pid,
            None => {
                let pid = PageId(inner.next_page);
                inner.next_page += 1;
                pid
            }
        };
        inner.pages.insert(page_id, Box::new([0u8; PAGE_SIZE]));
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.pages.remove(&page_id).is_some() {
            inner.free.push(page_id);
        }
        Ok(())
    }
}
