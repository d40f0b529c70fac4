//! Buffer pool manager.

use crate::device::BlockDevice;
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Owns a fixed array of page frames and mediates between them and the
/// block device:
/// - Page ID to frame ID mapping (the page table)
/// - Free frame list, consulted before the replacer
/// - LRU replacement for eviction
/// - Pin counting for concurrent access
/// - Dirty write-back on eviction, flush, and deletion
///
/// A single pool latch serializes the identifier-level bookkeeping; each
/// frame's data latch protects its buffer once the frame is handed out. The
/// pool latch is always acquired before any frame latch, never the reverse.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Underlying page store.
    device: Arc<dyn BlockDevice>,
    /// Array of buffer frames, created at construction and never destroyed.
    frames: Vec<BufferFrame>,
    /// Page table and free list, behind the pool latch.
    inner: Mutex<PoolInner>,
    /// Page replacement policy.
    replacer: LruReplacer,
}

struct PoolInner {
    /// Maps resident page IDs to the frames holding them.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not holding any page.
    free_list: Vec<FrameId>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given block device.
    pub fn new(device: Arc<dyn BlockDevice>, config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            device,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(num_frames),
                free_list,
            }),
            replacer: LruReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and allocates 25% of it
    /// for the buffer pool. Minimum 1,000 frames to ensure useful caching
    /// even on low-memory systems.
    pub fn auto_sized(device: Arc<dyn BlockDevice>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4; // 25% of available RAM
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(device, BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently resident in the pool.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Fetches a page, reading it from the device if not resident.
    ///
    /// The returned frame is pinned; the caller must balance with
    /// [`unpin_page`](Self::unpin_page). Fails with `PoolExhausted` when
    /// every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.as_usize()];
            self.replacer.pin(frame_id);
            frame.pin();
            return Ok(frame);
        }

        let frame_id = self
            .find_available(&mut inner)
            .ok_or(BasaltError::PoolExhausted)?;
        let frame = &self.frames[frame_id.as_usize()];

        if let Err(e) = self.load_into(&mut inner, frame, page_id) {
            self.release_unused(&mut inner, frame);
            return Err(e);
        }
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        Ok(frame)
    }

    /// Allocates a fresh page on the device and pins it in a zeroed frame.
    ///
    /// Returns the frame and the new page's identifier. Fails with
    /// `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<(&BufferFrame, PageId)> {
        let mut inner = self.inner.lock();

        let frame_id = self
            .find_available(&mut inner)
            .ok_or(BasaltError::PoolExhausted)?;
        let frame = &self.frames[frame_id.as_usize()];

        if let Err(e) = self.evict_victim(&mut inner, frame) {
            self.release_unused(&mut inner, frame);
            return Err(e);
        }
        let page_id = match self.device.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                self.release_unused(&mut inner, frame);
                return Err(e);
            }
        };

        tracing::trace!("new page {page_id} in {}", frame.frame_id());
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        Ok((frame, page_id))
    }

    /// Releases one pin on a resident page, ORing in the dirty hint.
    ///
    /// When the last pin is dropped the frame becomes an eviction candidate.
    /// Returns false if the page had no outstanding pins; unpinning a
    /// non-resident page is a harmless no-op that returns true.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id.as_usize()];

        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page back to the device.
    ///
    /// Returns true if the page was resident (its on-device image is current
    /// on return), false otherwise.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let inner = self.inner.lock();
        self.flush_resident(&inner, page_id)
    }

    /// Writes every resident page back to the device.
    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.inner.lock();

        let resident: Vec<PageId> = inner.page_table.keys().copied().collect();
        tracing::debug!("flushing {} resident pages", resident.len());
        for page_id in resident {
            self.flush_resident(&inner, page_id)?;
        }
        Ok(())
    }

    /// Deletes a page, releasing its identifier on the device.
    ///
    /// Returns false if the page is resident and still pinned. Deleting a
    /// non-resident page only deallocates on the device.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            self.device.deallocate_page(page_id)?;
            return Ok(true);
        };
        let frame = &self.frames[frame_id.as_usize()];

        if frame.is_pinned() {
            return Ok(false);
        }
        self.device.deallocate_page(page_id)?;
        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push(frame_id);
        Ok(true)
    }

    /// Fetches a page behind an RAII read guard; dropping the guard unpins.
    pub fn read_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageReadGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Fetches a page behind an RAII write guard; dropping the guard unpins.
    pub fn write_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();

        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.as_usize()];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: inner.free_list.len(),
            resident_pages: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }

    /// Picks a frame for reuse: free list first, then the replacer.
    ///
    /// Free frames take precedence to keep cold frames cold and avoid
    /// replacer churn on startup.
    fn find_available(&self, inner: &mut PoolInner) -> Option<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Some(frame_id);
        }
        self.replacer.victim()
    }

    /// Unmaps a victim frame, writing its page back if dirty, and resets it.
    ///
    /// The write-back happens before the page table entry is removed, so a
    /// device failure leaves the victim fully resident.
    fn evict_victim(&self, inner: &mut PoolInner, frame: &BufferFrame) -> Result<()> {
        if let Some(old_id) = frame.page_id() {
            if frame.is_dirty() {
                tracing::trace!("evicting dirty {old_id} from {}", frame.frame_id());
                let data = frame.read_data();
                self.device.write_page(old_id, &data)?;
                drop(data);
                frame.set_dirty(false);
            }
            inner.page_table.remove(&old_id);
        }
        frame.reset();
        Ok(())
    }

    /// Returns a frame taken by `find_available` that ended up unused.
    ///
    /// A still-resident victim goes back to the replacer; an empty frame
    /// goes back to the free list.
    fn release_unused(&self, inner: &mut PoolInner, frame: &BufferFrame) {
        if frame.page_id().is_some() {
            self.replacer.unpin(frame.frame_id());
        } else {
            inner.free_list.push(frame.frame_id());
        }
    }

    /// Evicts the victim frame and reads `page_id` from the device into it.
    fn load_into(&self, inner: &mut PoolInner, frame: &BufferFrame, page_id: PageId) -> Result<()> {
        self.evict_victim(inner, frame)?;
        {
            let mut data = frame.write_data();
            self.device.read_page(page_id, &mut data)?;
        }
        frame.set_page_id(Some(page_id));
        Ok(())
    }

    /// Flushes one resident page under the pool latch.
    fn flush_resident(&self, inner: &PoolInner, page_id: PageId) -> Result<bool> {
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.as_usize()];

        if frame.is_dirty() {
            let data = frame.read_data();
            self.device.write_page(page_id, &data)?;
            frame.set_dirty(false);
        }
        Ok(true)
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of resident pages.
    pub resident_pages: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII guard for reading a page.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for writing a page.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns mutable access to page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page as dirty.
    pub fn set_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.frame.is_dirty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    fn create_test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(
            Arc::new(MemoryDevice::new()),
            BufferPoolConfig { num_frames },
        )
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);

        let (frame, page_id) = pool.new_page().unwrap();

        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_new_page_zeroed() {
        let pool = create_test_pool(10);

        let (frame, _) = pool.new_page().unwrap();
        let data = frame.read_data();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_pool_fetch_resident() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        // Same identifier maps to the same frame
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_buffer_pool_fetch_unallocated() {
        let pool = create_test_pool(10);

        // Nothing was ever allocated for this identifier
        let result = pool.fetch_page(PageId(7));
        assert!(matches!(result, Err(BasaltError::PageNotFound { .. })));
        // The candidate frame went back to the free list
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_fetch_pin_count() {
        let pool = create_test_pool(10);

        let (frame, page_id) = pool.new_page().unwrap();
        assert_eq!(frame.pin_count(), 1);

        pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.pin_count(), 2);

        assert!(pool.unpin_page(page_id, false));
        assert!(pool.unpin_page(page_id, false));
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_buffer_pool_unpin_underflow() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        assert!(pool.unpin_page(page_id, false));
        // Pin count already zero
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_buffer_pool_unpin_non_resident() {
        let pool = create_test_pool(10);

        // Idempotent on non-resident pages
        assert!(pool.unpin_page(PageId(42), false));
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_exhaustion() {
        let pool = create_test_pool(2);

        let (_, p1) = pool.new_page().unwrap();
        let (_, _p2) = pool.new_page().unwrap();

        // All frames pinned
        assert!(matches!(pool.new_page(), Err(BasaltError::PoolExhausted)));

        // Releasing one pin makes a frame evictable again
        pool.unpin_page(p1, false);
        let (_, p3) = pool.new_page().unwrap();
        assert!(pool.contains(p3));
        assert!(!pool.contains(p1));
    }

    #[test]
    fn test_buffer_pool_eviction_never_selects_pinned() {
        let pool = create_test_pool(2);

        let (_, p1) = pool.new_page().unwrap();
        let (_, p2) = pool.new_page().unwrap();
        pool.unpin_page(p2, false);

        // Only the unpinned page may be evicted
        let (_, _p3) = pool.new_page().unwrap();
        assert!(pool.contains(p1));
        assert!(!pool.contains(p2));
    }

    #[test]
    fn test_buffer_pool_dirty_eviction_round_trip() {
        let pool = create_test_pool(1);

        let (frame, p1) = pool.new_page().unwrap();
        frame.write_data()[0] = 0xAA;
        pool.unpin_page(p1, true);

        // Evicts p1, writing it back to the device
        let (_, p2) = pool.new_page().unwrap();
        assert!(!pool.contains(p1));
        pool.unpin_page(p2, false);

        // Re-fetching reads the written-back bytes
        let frame = pool.fetch_page(p1).unwrap();
        assert_eq!(frame.read_data()[0], 0xAA);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let device = Arc::new(MemoryDevice::new());
        let pool = BufferPool::new(device.clone(), BufferPoolConfig { num_frames: 10 });

        let (frame, page_id) = pool.new_page().unwrap();
        frame.write_data()[0] = 0xCD;
        pool.unpin_page(page_id, true);

        assert!(pool.flush_page(page_id).unwrap());

        let mut on_disk = [0u8; PAGE_SIZE];
        device.read_page(page_id, &mut on_disk).unwrap();
        assert_eq!(on_disk[0], 0xCD);

        // Page is clean after the flush
        let frame = pool.fetch_page(page_id).unwrap();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_non_resident() {
        let pool = create_test_pool(10);
        assert!(!pool.flush_page(PageId(3)).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let device = Arc::new(MemoryDevice::new());
        let pool = BufferPool::new(device.clone(), BufferPoolConfig { num_frames: 10 });

        let mut page_ids = Vec::new();
        for i in 0..5 {
            let (frame, page_id) = pool.new_page().unwrap();
            frame.write_data()[0] = i as u8 + 1;
            pool.unpin_page(page_id, true);
            page_ids.push(page_id);
        }

        pool.flush_all_pages().unwrap();

        for (i, &page_id) in page_ids.iter().enumerate() {
            let mut on_disk = [0u8; PAGE_SIZE];
            device.read_page(page_id, &mut on_disk).unwrap();
            assert_eq!(on_disk[0], i as u8 + 1);
        }
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.contains(page_id));
        assert!(pool.delete_page(page_id).unwrap());
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        // Still pinned
        assert!(!pool.delete_page(page_id).unwrap());
        assert!(pool.contains(page_id));

        pool.unpin_page(page_id, false);
        assert!(pool.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_delete_twice_pinned() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        pool.fetch_page(page_id).unwrap();

        assert!(!pool.delete_page(page_id).unwrap());
        pool.unpin_page(page_id, false);
        assert!(!pool.delete_page(page_id).unwrap());
        pool.unpin_page(page_id, false);
        assert!(pool.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_buffer_pool_delete_non_resident() {
        let device = Arc::new(MemoryDevice::new());
        let pool = BufferPool::new(device.clone(), BufferPoolConfig { num_frames: 1 });

        let (_, p1) = pool.new_page().unwrap();
        pool.unpin_page(p1, false);
        // Evict p1
        let (_, p2) = pool.new_page().unwrap();
        pool.unpin_page(p2, false);

        // Deleting a non-resident page only deallocates on the device
        assert!(pool.delete_page(p1).unwrap());
        assert_eq!(device.num_pages(), 1);
    }

    #[test]
    fn test_buffer_pool_read_guard() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        {
            let guard = pool.read_page(page_id).unwrap();
            assert_eq!(guard.page_id(), page_id);
            // Guard holds one pin
        }

        // After guard dropped, fetch adds a fresh single pin
        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_buffer_pool_write_guard() {
        let pool = create_test_pool(10);

        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        {
            let guard = pool.write_page(page_id).unwrap();
            guard.set_dirty();
            {
                let mut data = guard.data_mut();
                data[0] = 0xFF;
            }
        }

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
        assert_eq!(frame.read_data()[0], 0xFF);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = create_test_pool(10);

        for i in 0..5 {
            let (_, page_id) = pool.new_page().unwrap();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true); // Dirty, unpinned
            }
            // Odd pages remain pinned
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.resident_pages, 5);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 3);
    }

    #[test]
    fn test_buffer_pool_concurrent_fetch_unpin() {
        use std::thread;

        let pool = Arc::new(create_test_pool(8));
        let mut page_ids = Vec::new();
        for _ in 0..4 {
            let (_, page_id) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false);
            page_ids.push(page_id);
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let page_ids = page_ids.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1_000 {
                    for &page_id in &page_ids {
                        let frame = pool.fetch_page(page_id).unwrap();
                        assert_eq!(frame.page_id(), Some(page_id));
                        assert!(pool.unpin_page(page_id, false));
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every pin was balanced by an unpin
        for &page_id in &page_ids {
            let frame = pool.fetch_page(page_id).unwrap();
            assert_eq!(frame.pin_count(), 1);
            pool.unpin_page(page_id, false);
        }
    }
}
