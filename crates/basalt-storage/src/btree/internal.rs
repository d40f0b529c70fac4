//! B+ tree internal pages.

use super::header::{self, TreePageKind};
use super::key::IndexKey;
use basalt_buffer::BufferPool;
use basalt_common::page::{Lsn, PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use std::cmp::Ordering;

/// Sets a child's parent pointer through the buffer pool.
///
/// Children are addressed by identifier, never by reference, so re-parenting
/// always goes through a fetch/mutate/unpin-dirty cycle.
fn update_parent(pool: &BufferPool, child_id: PageId, parent_id: PageId) -> Result<()> {
    let frame = pool.fetch_page(child_id)?;
    {
        let mut data = frame.write_data();
        header::set_parent_page_id(&mut data[..], parent_id);
    }
    pool.unpin_page(child_id, true);
    Ok(())
}

/// View over an internal tree page resident in a buffer frame.
///
/// The body is an array of `(key, child_page_id)` entries. The key at index 0
/// is a dummy slot that is never consulted during lookup; only indices
/// `[1, size)` carry meaningful separator keys, while all child identifiers
/// at `[0, size)` are valid. For `i >= 1`, `key[i]` separates the subtrees of
/// `child[i-1]` and `child[i]`.
///
/// All mutations assume the caller holds the frame's writer latch.
pub struct InternalPage<'a, const N: usize> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a, const N: usize> InternalPage<'a, N> {
    /// On-page stride of one entry: key bytes plus a child identifier.
    pub const ENTRY_SIZE: usize = N + 4;

    /// Largest usable `max_size`; one slot stays reserved so an insertion
    /// may overflow to `max_size + 1` transiently before a split.
    pub fn max_capacity() -> usize {
        (PAGE_SIZE - header::HEADER_SIZE) / Self::ENTRY_SIZE - 1
    }

    /// Stamps a fresh internal page onto a zeroed buffer.
    pub fn init(
        data: &'a mut [u8; PAGE_SIZE],
        page_id: PageId,
        parent_id: PageId,
        max_size: usize,
    ) -> Self {
        debug_assert!(max_size >= 2 && max_size <= Self::max_capacity());
        header::init(
            &mut data[..],
            TreePageKind::Internal,
            page_id,
            parent_id,
            max_size,
        );
        Self { data }
    }

    /// Reinterprets an existing buffer as an internal page.
    pub fn view(data: &'a mut [u8; PAGE_SIZE]) -> Result<Self> {
        match header::page_kind(&data[..])? {
            TreePageKind::Internal => Ok(Self { data }),
            other => Err(BasaltError::InvalidPageKind { found: other as u8 }),
        }
    }

    pub fn page_id(&self) -> PageId {
        header::page_id(&self.data[..])
    }

    pub fn parent_page_id(&self) -> PageId {
        header::parent_page_id(&self.data[..])
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        header::set_parent_page_id(&mut self.data[..], parent);
    }

    pub fn lsn(&self) -> Lsn {
        header::lsn(&self.data[..])
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        header::set_lsn(&mut self.data[..], lsn);
    }

    /// Current number of entries (children).
    pub fn size(&self) -> usize {
        header::entry_count(&self.data[..])
    }

    pub fn max_size(&self) -> usize {
        header::max_entries(&self.data[..])
    }

    /// Minimum entry count for a non-root page.
    pub fn min_size(&self) -> usize {
        self.max_size().div_ceil(2)
    }

    /// True once an insertion has pushed the page past `max_size`.
    pub fn needs_split(&self) -> bool {
        self.size() > self.max_size()
    }

    /// True when a non-root page has fallen below the fill threshold.
    pub fn is_underfull(&self) -> bool {
        self.size() < self.min_size()
    }

    fn set_size(&mut self, size: usize) {
        header::set_entry_count(&mut self.data[..], size);
    }

    fn entry_offset(index: usize) -> usize {
        header::HEADER_SIZE + index * Self::ENTRY_SIZE
    }

    /// Returns the key at `index`. Index 0 is the dummy slot.
    pub fn key_at(&self, index: usize) -> IndexKey<N> {
        debug_assert!(index < self.size());
        let off = Self::entry_offset(index);
        let mut key = [0u8; N];
        key.copy_from_slice(&self.data[off..off + N]);
        IndexKey(key)
    }

    pub fn set_key_at(&mut self, index: usize, key: IndexKey<N>) {
        debug_assert!(index < self.size());
        let off = Self::entry_offset(index);
        self.data[off..off + N].copy_from_slice(&key.0);
    }

    /// Returns the child identifier at `index`.
    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        let off = Self::entry_offset(index) + N;
        PageId(u32::from_le_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ]))
    }

    fn set_child_at(&mut self, index: usize, child: PageId) {
        let off = Self::entry_offset(index) + N;
        self.data[off..off + 4].copy_from_slice(&child.0.to_le_bytes());
    }

    fn entry_at(&self, index: usize) -> (IndexKey<N>, PageId) {
        let off = Self::entry_offset(index);
        let mut key = [0u8; N];
        key.copy_from_slice(&self.data[off..off + N]);
        let child = PageId(u32::from_le_bytes([
            self.data[off + N],
            self.data[off + N + 1],
            self.data[off + N + 2],
            self.data[off + N + 3],
        ]));
        (IndexKey(key), child)
    }

    fn set_entry_at(&mut self, index: usize, key: IndexKey<N>, child: PageId) {
        let off = Self::entry_offset(index);
        self.data[off..off + N].copy_from_slice(&key.0);
        self.data[off + N..off + N + 4].copy_from_slice(&child.0.to_le_bytes());
    }

    /// Returns the index whose child matches, scanning `[0, size)`.
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }

    /// Copies out all entries. The key of entry 0 is the dummy slot.
    pub fn entries(&self) -> Vec<(IndexKey<N>, PageId)> {
        (0..self.size()).map(|i| self.entry_at(i)).collect()
    }

    /// Returns the child whose subtree may contain `key`.
    ///
    /// Binary search over the separator keys `[1, size)`; the dummy key at
    /// index 0 is never consulted.
    pub fn lookup<C>(&self, key: &IndexKey<N>, cmp: &C) -> PageId
    where
        C: Fn(&IndexKey<N>, &IndexKey<N>) -> Ordering,
    {
        let size = self.size();
        debug_assert!(size >= 1);
        if size == 1 {
            return self.child_at(0);
        }

        // Smallest i in [1, size) with key[i] > search key
        let mut lo = 1;
        let mut hi = size - 1;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if cmp(&self.key_at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        if cmp(&self.key_at(lo), key) == Ordering::Greater {
            self.child_at(lo - 1)
        } else {
            self.child_at(lo)
        }
    }

    /// Fills a fresh root after the old root split.
    ///
    /// The old root becomes the leftmost child; `new_key` separates it from
    /// `new_child`.
    pub fn populate_new_root(&mut self, old_child: PageId, new_key: IndexKey<N>, new_child: PageId) {
        self.set_size(2);
        self.set_child_at(0, old_child);
        self.set_entry_at(1, new_key, new_child);
    }

    /// Inserts `(new_key, new_child)` immediately after the entry whose
    /// child is `old_child`. Returns the new size.
    ///
    /// The caller must leave the reserved overflow slot available.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        new_key: IndexKey<N>,
        new_child: PageId,
    ) -> usize {
        let size = self.size();
        debug_assert!(size <= self.max_size());
        let index = self
            .child_index(old_child)
            .expect("old child must be present in the page");

        for i in ((index + 1)..size).rev() {
            let (k, c) = self.entry_at(i);
            self.set_entry_at(i + 1, k, c);
        }
        self.set_entry_at(index + 1, new_key, new_child);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes the entry at `index`, closing the gap.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        for i in index..size - 1 {
            let (k, c) = self.entry_at(i + 1);
            self.set_entry_at(i, k, c);
        }
        self.set_size(size - 1);
    }

    /// Removes the only remaining child and returns it.
    ///
    /// Used when the root collapses to a single child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.child_at(0);
        self.set_size(0);
        child
    }

    /// Moves the upper half of this page's entries into an empty `recipient`,
    /// re-parenting each moved child.
    pub fn move_half_to(&mut self, recipient: &mut InternalPage<'_, N>, pool: &BufferPool) -> Result<()> {
        debug_assert!(self.needs_split());
        debug_assert_eq!(recipient.size(), 0);

        let size = self.size();
        let half = size / 2;
        let moved = size - half;
        let recipient_id = recipient.page_id();
        for i in 0..moved {
            let (key, child) = self.entry_at(half + i);
            recipient.set_entry_at(i, key, child);
            update_parent(pool, child, recipient_id)?;
        }
        self.set_size(half);
        recipient.set_size(moved);
        Ok(())
    }

    /// Appends `items`, adopting each moved child.
    pub fn copy_n_from(
        &mut self,
        items: &[(IndexKey<N>, PageId)],
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size();
        debug_assert!(size + items.len() <= self.max_size());
        let page_id = self.page_id();
        for (i, &(key, child)) in items.iter().enumerate() {
            self.set_entry_at(size + i, key, child);
            update_parent(pool, child, page_id)?;
        }
        self.set_size(size + items.len());
        Ok(())
    }

    /// Moves every entry into `recipient` (merge).
    ///
    /// `middle_key` is the separator lifted from the parent; it lands in this
    /// page's dummy slot so the recipient receives a meaningful key for what
    /// was our leftmost child.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InternalPage<'_, N>,
        middle_key: IndexKey<N>,
        pool: &BufferPool,
    ) -> Result<()> {
        self.set_key_at(0, middle_key);
        let items = self.entries();
        recipient.copy_n_from(&items, pool)?;
        self.set_size(0);
        Ok(())
    }

    /// Moves this page's first entry to the end of `recipient`
    /// (left-to-right redistribution).
    ///
    /// The moved child is paired with `middle_key`, the separator lifted from
    /// the parent. After the shift, the donor's new first separator is the
    /// key that must replace `middle_key` in the parent; installing it there
    /// is the caller's responsibility.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InternalPage<'_, N>,
        middle_key: IndexKey<N>,
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size();
        debug_assert!(size > 0);

        let (_, child) = self.entry_at(0);
        for i in 0..size - 1 {
            let (k, c) = self.entry_at(i + 1);
            self.set_entry_at(i, k, c);
        }
        self.set_size(size - 1);
        recipient.copy_last_from(middle_key, child, pool)
    }

    /// Moves this page's last entry to the front of `recipient`
    /// (right-to-left redistribution).
    ///
    /// The prepend pushes the recipient's old dummy key to index 1, where it
    /// is overwritten with `middle_key` to restore the dummy-slot invariant.
    /// The moved key is the one the caller promotes into the parent.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InternalPage<'_, N>,
        middle_key: IndexKey<N>,
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size();
        debug_assert!(size > 0);

        let (key, child) = self.entry_at(size - 1);
        self.set_size(size - 1);
        recipient.copy_first_from(key, child, pool)?;
        recipient.set_key_at(1, middle_key);
        Ok(())
    }

    /// Appends one entry, adopting its child.
    pub fn copy_last_from(
        &mut self,
        key: IndexKey<N>,
        child: PageId,
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size();
        debug_assert!(size < self.max_size());
        self.set_entry_at(size, key, child);
        self.set_size(size + 1);
        update_parent(pool, child, self.page_id())
    }

    /// Prepends one entry, shifting the array right, and adopts its child.
    pub fn copy_first_from(
        &mut self,
        key: IndexKey<N>,
        child: PageId,
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size();
        debug_assert!(size < self.max_size());
        for i in (0..size).rev() {
            let (k, c) = self.entry_at(i);
            self.set_entry_at(i + 1, k, c);
        }
        self.set_entry_at(0, key, child);
        self.set_size(size + 1);
        update_parent(pool, child, self.page_id())
    }
}
