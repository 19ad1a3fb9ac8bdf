//! LRU cache for B-tree nodes.
//!
//! Maps node offset to node, tracks access order, and remembers which
//! entries are dirty. When a dirty entry is evicted the externally supplied
//! flush callback persists it; a callback failure is logged and the
//! eviction proceeds, because durability of acknowledged data is carried by
//! the op-log and checkpoints, not by eviction.

use crate::error::CoreResult;
use crate::node::Node;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Callback invoked to persist a dirty node when it is evicted.
pub type FlushFn = Box<dyn Fn(u64, &Node) -> CoreResult<()> + Send + Sync>;

/// Sentinel index for list ends.
const NIL: usize = usize::MAX;

struct Slot {
    offset: u64,
    node: Arc<Node>,
    dirty: bool,
    prev: usize,
    next: usize,
}

/// Cache internals: the offset map plus an index-linked doubly-linked list
/// over slots, most-recently-used at the head.
struct CacheInner {
    map: HashMap<u64, usize>,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl CacheInner {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn slot(&self, idx: usize) -> &Slot {
        self.slots[idx].as_ref().expect("live slot index")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        self.slots[idx].as_mut().expect("live slot index")
    }

    /// Detaches a slot from the access-order list.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.slot_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slot_mut(next).prev = prev;
        }
    }

    /// Links a slot in at the head (most recently used).
    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slot_mut(old_head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn insert_front(&mut self, offset: u64, node: Arc<Node>, dirty: bool) {
        let slot = Slot {
            offset,
            node,
            dirty,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.map.insert(offset, idx);
        self.push_front(idx);
    }

    /// Removes the least-recently-used slot, returning it for flushing.
    fn pop_tail(&mut self) -> Option<Slot> {
        let idx = self.tail;
        if idx == NIL {
            return None;
        }
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("live tail slot");
        self.map.remove(&slot.offset);
        self.free.push(idx);
        Some(slot)
    }
}

/// An LRU node cache with a dirty-eviction flush hook.
///
/// All operations are O(1) and safe under concurrent callers: one mutex
/// guards the map, the access-order list, and the dirty bookkeeping (every
/// lookup reorders the list, so a read path without the mutex would buy
/// nothing).
pub struct NodeCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    flush: FlushFn,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeCache {
    /// Creates a cache with the given capacity and flush callback.
    ///
    /// Capacity must be non-zero; the facade validates this before
    /// construction.
    pub fn new(capacity: usize, flush: FlushFn) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::new(capacity)),
            flush,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a node, promoting it to most-recently-used on a hit.
    pub fn get(&self, offset: u64) -> Option<Arc<Node>> {
        let mut inner = self.inner.lock();
        match inner.map.get(&offset).copied() {
            Some(idx) => {
                inner.move_to_front(idx);
                let node = Arc::clone(&inner.slot(idx).node);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(node)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces the node at `offset`, marking it most-recently-used.
    ///
    /// When the cache is full the least-recently-used entry is evicted
    /// first; if that entry is dirty the flush callback runs. A flush
    /// failure is logged and the eviction proceeds.
    pub fn put(&self, offset: u64, node: Node, dirty: bool) {
        let node = Arc::new(node);
        let mut inner = self.inner.lock();

        if let Some(idx) = inner.map.get(&offset).copied() {
            {
                let slot = inner.slot_mut(idx);
                slot.node = node;
                slot.dirty = dirty;
            }
            inner.move_to_front(idx);
            return;
        }

        if inner.map.len() >= self.capacity {
            if let Some(evicted) = inner.pop_tail() {
                if evicted.dirty {
                    if let Err(e) = (self.flush)(evicted.offset, &evicted.node) {
                        warn!(
                            offset = evicted.offset,
                            error = %e,
                            "failed to flush dirty node on eviction"
                        );
                    }
                }
            }
        }

        inner.insert_front(offset, node, dirty);
    }

    /// Flushes every dirty entry and clears its dirty flag.
    ///
    /// Unlike eviction, a callback failure here propagates: a checkpoint
    /// must not report success over unflushed nodes.
    pub fn flush_dirty(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let dirty: Vec<usize> = inner
            .map
            .values()
            .copied()
            .filter(|&idx| inner.slot(idx).dirty)
            .collect();
        for idx in dirty {
            let (offset, node) = {
                let slot = inner.slot(idx);
                (slot.offset, Arc::clone(&slot.node))
            };
            (self.flush)(offset, &node)?;
            inner.slot_mut(idx).dirty = false;
        }
        Ok(())
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of cache hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of cache misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::{Entry, StoredKey};
    use parking_lot::Mutex as PlMutex;

    fn node(byte: u8) -> Node {
        Node {
            is_leaf: true,
            entries: vec![Entry::new(StoredKey::from_digest(&[byte; 32]), vec![byte])],
            children: Vec::new(),
        }
    }

    fn no_flush() -> FlushFn {
        Box::new(|_, _| Ok(()))
    }

    #[test]
    fn get_miss_returns_none() {
        let cache = NodeCache::new(4, no_flush());
        assert!(cache.get(16).is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn put_then_get() {
        let cache = NodeCache::new(4, no_flush());
        cache.put(16, node(1), false);

        let got = cache.get(16).unwrap();
        assert_eq!(*got, node(1));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn put_replaces_existing() {
        let cache = NodeCache::new(4, no_flush());
        cache.put(16, node(1), false);
        cache.put(16, node(2), true);

        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.get(16).unwrap(), node(2));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = NodeCache::new(2, no_flush());
        cache.put(16, node(1), false);
        cache.put(32, node(2), false);

        // Touch 16 so 32 becomes LRU.
        cache.get(16);

        cache.put(48, node(3), false);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(32).is_none());
        assert!(cache.get(16).is_some());
        assert!(cache.get(48).is_some());
    }

    #[test]
    fn eviction_flushes_dirty_entry() {
        let flushed: Arc<PlMutex<Vec<(u64, Node)>>> = Arc::new(PlMutex::new(Vec::new()));
        let record = Arc::clone(&flushed);
        let cache = NodeCache::new(1, Box::new(move |offset, node| {
            record.lock().push((offset, node.clone()));
            Ok(())
        }));

        cache.put(16, node(1), true);
        cache.put(32, node(2), false);

        let flushed = flushed.lock();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, 16);
        assert_eq!(flushed[0].1, node(1));
    }

    #[test]
    fn eviction_skips_clean_entry() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let cache = NodeCache::new(1, Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        cache.put(16, node(1), false);
        cache.put(32, node(2), false);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn flush_error_does_not_abort_eviction() {
        let cache = NodeCache::new(1, Box::new(|_, _| {
            Err(CoreError::corrupt_state("flush refused"))
        }));

        cache.put(16, node(1), true);
        cache.put(32, node(2), false);

        // Eviction completed despite the callback error.
        assert_eq!(cache.len(), 1);
        assert!(cache.get(16).is_none());
        assert!(cache.get(32).is_some());
    }

    #[test]
    fn flush_dirty_writes_all_and_clears_flags() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let cache = NodeCache::new(8, Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        cache.put(16, node(1), true);
        cache.put(32, node(2), false);
        cache.put(48, node(3), true);

        cache.flush_dirty().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Flags cleared: a second pass flushes nothing.
        cache.flush_dirty().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn flush_dirty_propagates_errors() {
        let cache = NodeCache::new(8, Box::new(|_, _| {
            Err(CoreError::corrupt_state("flush refused"))
        }));
        cache.put(16, node(1), true);

        assert!(cache.flush_dirty().is_err());
    }

    #[test]
    fn heavy_reuse_keeps_list_consistent() {
        let cache = NodeCache::new(3, no_flush());
        for round in 0..10u8 {
            for offset in [16u64, 32, 48, 64, 80] {
                cache.put(offset, node(round), false);
                cache.get(offset);
            }
        }
        assert_eq!(cache.len(), 3);
    }
}
