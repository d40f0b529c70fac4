//! Disk manager for page-level file I/O.

use basalt_buffer::BlockDevice;
use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the data file inside the data directory.
const DATA_FILE: &str = "basalt.dat";

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for the data file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages in a single data file.
///
/// Page identifiers map directly to file offsets (`page_id * PAGE_SIZE`).
/// Deallocated identifiers are recycled by allocation within a process
/// lifetime; the free list is not persisted across restarts.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// File handle and allocation state.
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    /// The data file.
    file: File,
    /// Number of pages the file has been extended to.
    num_pages: u32,
    /// Deallocated identifiers available for reuse.
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Creates a new disk manager, opening or creating the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(DATA_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the number of pages in the data file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }
}

impl BlockDevice for DiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.num_pages {
            return Err(BasaltError::PageNotFound { page_id });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        // Track extension if the write grew the file
        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_id) = inner.free_pages.pop() {
            // Recycled identifier: clear the stale page image
            let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.write_all(&[0u8; PAGE_SIZE])?;
            if self.config.fsync_enabled {
                inner.file.sync_all()?;
            }
            tracing::trace!("reusing deallocated {page_id}");
            return Ok(page_id);
        }

        let page_id = PageId(inner.num_pages);

        // Extend the file with a zeroed page
        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.num_pages = page_id.0 + 1;
        tracing::trace!("allocated {page_id}");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_id.0 < inner.num_pages && !inner.free_pages.contains(&page_id) {
            inner.free_pages.push(page_id);
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        let _ = inner.file.sync_all();
    }
}
