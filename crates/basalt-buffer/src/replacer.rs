//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Trait for page replacement algorithms.
///
/// A replacer tracks the set of unpinned frames (eviction candidates) and
/// selects victims among them. Frames with a non-zero pin count must never
/// be in the candidate set.
pub trait Replacer: Send + Sync {
    /// Selects and removes a victim frame for eviction.
    ///
    /// Returns None if no frames are evictable.
    fn victim(&self) -> Option<FrameId>;

    /// Removes a frame from the candidate set. No-op if not a candidate.
    fn pin(&self, frame_id: FrameId);

    /// Adds a frame to the candidate set. No-op if already a candidate;
    /// repeated unpins must not duplicate or reorder the frame.
    fn unpin(&self, frame_id: FrameId);

    /// Returns the number of eviction candidates.
    fn size(&self) -> usize;
}

/// Sentinel index for list ends.
const NIL: u32 = u32::MAX;

/// LRU replacement algorithm.
///
/// Candidates are kept in least-recently-unpinned order: `unpin` inserts at
/// the front, `victim` removes from the back. The list is an intrusive
/// doubly-linked list over a fixed node array indexed by frame ID, so all
/// four operations are O(1).
pub struct LruReplacer {
    /// Internal state protected by mutex.
    inner: Mutex<LruInner>,
}

struct LruInner {
    /// One node per frame; links are frame IDs, NIL at list ends.
    nodes: Vec<LruNode>,
    /// Most recently unpinned frame.
    head: u32,
    /// Least recently unpinned frame (the victim end).
    tail: u32,
    /// Number of frames currently in the list.
    len: usize,
}

#[derive(Clone, Copy)]
struct LruNode {
    prev: u32,
    next: u32,
    linked: bool,
}

impl LruReplacer {
    /// Creates a new LRU replacer with capacity for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let nodes = vec![
            LruNode {
                prev: NIL,
                next: NIL,
                linked: false,
            };
            num_frames
        ];

        Self {
            inner: Mutex::new(LruInner {
                nodes,
                head: NIL,
                tail: NIL,
                len: 0,
            }),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

impl LruInner {
    /// Unlinks a frame from the list. Caller must ensure it is linked.
    fn unlink(&mut self, idx: u32) {
        let node = self.nodes[idx as usize];
        match node.prev {
            NIL => self.head = node.next,
            prev => self.nodes[prev as usize].next = node.next,
        }
        match node.next {
            NIL => self.tail = node.prev,
            next => self.nodes[next as usize].prev = node.prev,
        }
        self.nodes[idx as usize] = LruNode {
            prev: NIL,
            next: NIL,
            linked: false,
        };
        self.len -= 1;
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        if inner.tail == NIL {
            return None;
        }
        let idx = inner.tail;
        inner.unlink(idx);
        Some(FrameId(idx))
    }

    fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();

        let idx = frame_id.0;
        if (idx as usize) >= inner.nodes.len() || !inner.nodes[idx as usize].linked {
            return;
        }
        inner.unlink(idx);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();

        let idx = frame_id.0;
        if (idx as usize) >= inner.nodes.len() || inner.nodes[idx as usize].linked {
            return;
        }

        let old_head = inner.head;
        inner.nodes[idx as usize] = LruNode {
            prev: NIL,
            next: old_head,
            linked: true,
        };
        if old_head != NIL {
            inner.nodes[old_head as usize].prev = idx;
        }
        inner.head = idx;
        if inner.tail == NIL {
            inner.tail = idx;
        }
        inner.len += 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().len
    }
}
