//! The disk-resident B-tree engine.
//!
//! An ordered index over stored keys with minimum degree `t`. Nodes live in
//! the node file and are reached through the LRU cache; the root is held in
//! memory and only written through the superblock at checkpoint.
//!
//! Because the node store allocates offsets append-only, every mutation is
//! copy-on-write along the root-to-leaf path: a recursion level that
//! rewrites a child receives the child's new offset, patches its own child
//! table, and is rewritten in turn by its caller. A crash between those
//! writes loses nothing - recovery replays the op-log over the last
//! checkpointed root, re-executing the logical mutation from scratch.
//!
//! This layer deals exclusively in stored keys and sealed values; the
//! crypto envelope lives above it, in the facade.

use crate::cache::NodeCache;
use crate::error::{CoreError, CoreResult};
use crate::node::Node;
use crate::pager::NodeStore;
use crate::types::{Entry, StoredKey};
use std::cmp::Ordering;
use std::sync::Arc;

/// The B-tree over stored keys.
pub struct BTree {
    t: usize,
    store: NodeStore,
    cache: Arc<NodeCache>,
    root: Node,
    live: usize,
}

impl BTree {
    /// Opens the tree over a node store and cache.
    ///
    /// Loads the root recorded in the store's superblock, or starts with a
    /// fresh empty leaf root when none has been persisted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `t < 2`, or a decode/storage error if
    /// the persisted root cannot be loaded.
    pub fn open(t: usize, store: NodeStore, cache: Arc<NodeCache>) -> CoreResult<Self> {
        if t < 2 {
            return Err(CoreError::invalid_argument(
                "minimum degree must be at least 2",
            ));
        }
        let root = match store.load_root()? {
            Some((_, node)) => node,
            None => Node::new_leaf(),
        };
        let mut tree = Self {
            t,
            store,
            cache,
            root,
            live: 0,
        };
        let root = std::mem::take(&mut tree.root);
        tree.live = tree.count_entries(&root)?;
        tree.root = root;
        Ok(tree)
    }

    /// Returns the minimum degree.
    #[must_use]
    pub fn min_degree(&self) -> usize {
        self.t
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if the tree holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn max_keys(&self) -> usize {
        2 * self.t - 1
    }

    pub(crate) fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub(crate) fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Reads a node through the cache.
    fn load(&self, offset: u64) -> CoreResult<Arc<Node>> {
        if let Some(node) = self.cache.get(offset) {
            return Ok(node);
        }
        let node = self.store.read_node(offset)?;
        self.cache.put(offset, node.clone(), false);
        Ok(Arc::new(node))
    }

    /// Reads a node through the cache, returning an owned copy for mutation.
    fn load_mut(&self, offset: u64) -> CoreResult<Node> {
        Ok((*self.load(offset)?).clone())
    }

    /// Appends a node to the store and caches it dirty at its new offset.
    fn write_node(&self, node: Node) -> CoreResult<u64> {
        let offset = self.store.write_node(&node)?;
        self.cache.put(offset, node, true);
        Ok(offset)
    }

    /// Looks up the sealed value for a stored key.
    pub fn get(&self, key: &StoredKey) -> CoreResult<Option<Vec<u8>>> {
        let mut current: Option<Arc<Node>> = None;
        loop {
            let node: &Node = match &current {
                Some(arc) => arc,
                None => &self.root,
            };
            match node.entries.binary_search_by(|e| e.key.cmp(key)) {
                Ok(i) => return Ok(Some(node.entries[i].value.clone())),
                Err(i) => {
                    if node.is_leaf {
                        return Ok(None);
                    }
                    let offset = node.children[i];
                    current = Some(self.load(offset)?);
                }
            }
        }
    }

    /// Returns true if the stored key is present.
    pub fn contains(&self, key: &StoredKey) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts an entry, splitting full nodes on the way down.
    ///
    /// Inserting a stored key that already exists replaces the existing
    /// entry's value in place - an idempotent update, never a duplicate.
    ///
    /// Returns true if the key was newly created, false if an existing
    /// entry was updated.
    pub fn insert(&mut self, entry: Entry) -> CoreResult<bool> {
        if self.root.num_keys() == self.max_keys() {
            let old_offset = self.write_node(self.root.clone())?;
            let mut new_root = Node::new_internal(Vec::new(), vec![old_offset]);
            self.split_child(&mut new_root, 0)?;
            self.root = new_root;
        }

        let mut root = std::mem::take(&mut self.root);
        let result = self.insert_nonfull(&mut root, entry);
        self.root = root;

        let created = result?;
        if created {
            self.live += 1;
        }
        Ok(created)
    }

    fn insert_nonfull(&self, node: &mut Node, entry: Entry) -> CoreResult<bool> {
        match node.entries.binary_search_by(|e| e.key.cmp(&entry.key)) {
            Ok(i) => {
                node.entries[i].value = entry.value;
                Ok(false)
            }
            Err(mut i) => {
                if node.is_leaf {
                    node.entries.insert(i, entry);
                    return Ok(true);
                }

                let child = self.load(node.children[i])?;
                if child.num_keys() == self.max_keys() {
                    self.split_child(node, i)?;
                    // The promoted median now sits at position i; re-aim.
                    match entry.key.cmp(&node.entries[i].key) {
                        Ordering::Equal => {
                            node.entries[i].value = entry.value;
                            return Ok(false);
                        }
                        Ordering::Greater => i += 1,
                        Ordering::Less => {}
                    }
                }

                let mut child = self.load_mut(node.children[i])?;
                let created = self.insert_nonfull(&mut child, entry)?;
                node.children[i] = self.write_node(child)?;
                Ok(created)
            }
        }
    }

    /// Splits the full child at position `i` of `parent`.
    ///
    /// The new sibling takes the upper `t-1` entries (and upper `t`
    /// children); the median moves up into the parent. Both halves are
    /// persisted before the parent's tables are patched.
    fn split_child(&self, parent: &mut Node, i: usize) -> CoreResult<()> {
        let t = self.t;
        let mut left = self.load_mut(parent.children[i])?;

        let mut tail = left.entries.split_off(t - 1);
        let median = tail.remove(0);
        let right = Node {
            is_leaf: left.is_leaf,
            entries: tail,
            children: if left.is_leaf {
                Vec::new()
            } else {
                left.children.split_off(t)
            },
        };

        let right_offset = self.write_node(right)?;
        let left_offset = self.write_node(left)?;

        parent.children[i] = left_offset;
        parent.children.insert(i + 1, right_offset);
        parent.entries.insert(i, median);
        Ok(())
    }

    /// Replaces the value of an existing entry, leaving structure untouched.
    ///
    /// Returns false if the key is absent (and writes nothing).
    pub fn update(&mut self, key: &StoredKey, value: Vec<u8>) -> CoreResult<bool> {
        let mut root = std::mem::take(&mut self.root);
        let result = self.update_in(&mut root, key, value);
        self.root = root;
        result
    }

    fn update_in(&self, node: &mut Node, key: &StoredKey, value: Vec<u8>) -> CoreResult<bool> {
        match node.entries.binary_search_by(|e| e.key.cmp(key)) {
            Ok(i) => {
                node.entries[i].value = value;
                Ok(true)
            }
            Err(i) => {
                if node.is_leaf {
                    return Ok(false);
                }
                let mut child = self.load_mut(node.children[i])?;
                if self.update_in(&mut child, key, value)? {
                    node.children[i] = self.write_node(child)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Removes a stored key.
    ///
    /// Returns false if the key was absent. When the root is left keyless
    /// and internal, its sole child becomes the new root.
    pub fn remove(&mut self, key: &StoredKey) -> CoreResult<bool> {
        let mut root = std::mem::take(&mut self.root);
        let result: CoreResult<bool> = (|| {
            let removed = self.remove_from(&mut root, key)?;
            if removed && !root.is_leaf && root.entries.is_empty() {
                root = self.load_mut(root.children[0])?;
            }
            Ok(removed)
        })();
        self.root = root;

        if let Ok(true) = result {
            self.live -= 1;
        }
        result
    }

    fn remove_from(&self, node: &mut Node, key: &StoredKey) -> CoreResult<bool> {
        match node.entries.binary_search_by(|e| e.key.cmp(key)) {
            Ok(i) => {
                if node.is_leaf {
                    node.entries.remove(i);
                } else {
                    self.remove_internal(node, i)?;
                }
                Ok(true)
            }
            Err(i) => {
                if node.is_leaf {
                    return Ok(false);
                }

                let mut i = i;
                let child = self.load(node.children[i])?;
                if child.num_keys() < self.t {
                    self.fill(node, i)?;
                    // Filling may have rotated separators or merged the
                    // child away; re-resolve the descent index.
                    i = node.entries.partition_point(|e| e.key < *key);
                }

                let mut child = self.load_mut(node.children[i])?;
                let removed = self.remove_from(&mut child, key)?;
                if removed {
                    node.children[i] = self.write_node(child)?;
                }
                Ok(removed)
            }
        }
    }

    /// Removes the key at position `i` of an internal node.
    fn remove_internal(&self, node: &mut Node, i: usize) -> CoreResult<()> {
        let left = self.load(node.children[i])?;
        if left.num_keys() >= self.t {
            let pred = self.max_entry(node.children[i])?;
            let mut child = self.load_mut(node.children[i])?;
            if !self.remove_from(&mut child, &pred.key)? {
                return Err(CoreError::corrupt_state(
                    "predecessor vanished during delete",
                ));
            }
            node.children[i] = self.write_node(child)?;
            node.entries[i] = pred;
            return Ok(());
        }

        let right = self.load(node.children[i + 1])?;
        if right.num_keys() >= self.t {
            let succ = self.min_entry(node.children[i + 1])?;
            let mut child = self.load_mut(node.children[i + 1])?;
            if !self.remove_from(&mut child, &succ.key)? {
                return Err(CoreError::corrupt_state("successor vanished during delete"));
            }
            node.children[i + 1] = self.write_node(child)?;
            node.entries[i] = succ;
            return Ok(());
        }

        // Both neighbors are minimal: merge them around the key, then
        // delete the key from the merged child.
        let key = node.entries[i].key.clone();
        self.merge_children(node, i)?;
        let mut child = self.load_mut(node.children[i])?;
        if !self.remove_from(&mut child, &key)? {
            return Err(CoreError::corrupt_state("key vanished during merge delete"));
        }
        node.children[i] = self.write_node(child)?;
        Ok(())
    }

    /// Ensures the child at position `i` has at least `t` keys before a
    /// descent, by borrowing from a sibling or merging with one.
    fn fill(&self, node: &mut Node, i: usize) -> CoreResult<()> {
        if i > 0 && self.load(node.children[i - 1])?.num_keys() >= self.t {
            self.borrow_from_prev(node, i)
        } else if i < node.entries.len() && self.load(node.children[i + 1])?.num_keys() >= self.t {
            self.borrow_from_next(node, i)
        } else if i < node.entries.len() {
            self.merge_children(node, i)
        } else {
            self.merge_children(node, i - 1)
        }
    }

    /// Rotates a key in from the left sibling: the separator moves down to
    /// the front of child `i`, the sibling's last key moves up into the
    /// vacated slot, and the sibling's last child follows.
    fn borrow_from_prev(&self, node: &mut Node, i: usize) -> CoreResult<()> {
        let mut child = self.load_mut(node.children[i])?;
        let mut sibling = self.load_mut(node.children[i - 1])?;

        let last = sibling.entries.len() - 1;
        let promoted = sibling.entries.remove(last);
        let separator = std::mem::replace(&mut node.entries[i - 1], promoted);
        child.entries.insert(0, separator);

        if !child.is_leaf {
            let last_child = sibling.children.len() - 1;
            let moved = sibling.children.remove(last_child);
            child.children.insert(0, moved);
        }

        node.children[i - 1] = self.write_node(sibling)?;
        node.children[i] = self.write_node(child)?;
        Ok(())
    }

    /// Symmetric rotation from the right sibling.
    fn borrow_from_next(&self, node: &mut Node, i: usize) -> CoreResult<()> {
        let mut child = self.load_mut(node.children[i])?;
        let mut sibling = self.load_mut(node.children[i + 1])?;

        let promoted = sibling.entries.remove(0);
        let separator = std::mem::replace(&mut node.entries[i], promoted);
        child.entries.push(separator);

        if !child.is_leaf {
            child.children.push(sibling.children.remove(0));
        }

        node.children[i + 1] = self.write_node(sibling)?;
        node.children[i] = self.write_node(child)?;
        Ok(())
    }

    /// Merges child `i`, the separator at `i`, and child `i+1` into one
    /// node, removing the separator and the right child pointer from the
    /// parent.
    fn merge_children(&self, node: &mut Node, i: usize) -> CoreResult<()> {
        let mut left = self.load_mut(node.children[i])?;
        let right = self.load_mut(node.children[i + 1])?;

        left.entries.push(node.entries.remove(i));
        left.entries.extend(right.entries);
        if !left.is_leaf {
            left.children.extend(right.children);
        }

        node.children.remove(i + 1);
        node.children[i] = self.write_node(left)?;
        Ok(())
    }

    /// Returns the largest entry in the subtree rooted at `offset`.
    fn max_entry(&self, mut offset: u64) -> CoreResult<Entry> {
        loop {
            let node = self.load(offset)?;
            if node.is_leaf {
                return node.entries.last().cloned().ok_or_else(|| {
                    CoreError::corrupt_state("empty leaf on predecessor walk")
                });
            }
            offset = *node
                .children
                .last()
                .ok_or_else(|| CoreError::corrupt_state("internal node without children"))?;
        }
    }

    /// Returns the smallest entry in the subtree rooted at `offset`.
    fn min_entry(&self, mut offset: u64) -> CoreResult<Entry> {
        loop {
            let node = self.load(offset)?;
            if node.is_leaf {
                return node
                    .entries
                    .first()
                    .cloned()
                    .ok_or_else(|| CoreError::corrupt_state("empty leaf on successor walk"));
            }
            offset = *node
                .children
                .first()
                .ok_or_else(|| CoreError::corrupt_state("internal node without children"))?;
        }
    }

    /// Returns every stored key in ascending order.
    pub fn list_keys(&self) -> CoreResult<Vec<StoredKey>> {
        let mut out = Vec::with_capacity(self.live);
        self.collect_keys(&self.root, &mut out)?;
        Ok(out)
    }

    fn collect_keys(&self, node: &Node, out: &mut Vec<StoredKey>) -> CoreResult<()> {
        if node.is_leaf {
            out.extend(node.entries.iter().map(|e| e.key.clone()));
            return Ok(());
        }
        for (i, child_offset) in node.children.iter().enumerate() {
            let child = self.load(*child_offset)?;
            self.collect_keys(&child, out)?;
            if i < node.entries.len() {
                out.push(node.entries[i].key.clone());
            }
        }
        Ok(())
    }

    fn count_entries(&self, node: &Node) -> CoreResult<usize> {
        let mut total = node.entries.len();
        if !node.is_leaf {
            for &child_offset in &node.children {
                let child = self.load(child_offset)?;
                total += self.count_entries(&child)?;
            }
        }
        Ok(total)
    }

    /// Returns the tree height (a lone leaf root has height 1).
    pub fn height(&self) -> CoreResult<usize> {
        let mut height = 1;
        let mut current: Option<Arc<Node>> = None;
        loop {
            let node: &Node = match &current {
                Some(arc) => arc,
                None => &self.root,
            };
            if node.is_leaf {
                return Ok(height);
            }
            let offset = node.children[0];
            current = Some(self.load(offset)?);
            height += 1;
        }
    }

    /// Flushes dirty cache entries and persists the root through the
    /// superblock, returning the root's new offset.
    ///
    /// After this syncs, the op-log can be reset: the on-disk tree image
    /// alone reproduces the current state.
    pub fn checkpoint(&mut self) -> CoreResult<u64> {
        self.cache.flush_dirty()?;
        self.store.write_root(&self.root)
    }

    /// Walks the whole tree verifying its structural invariants.
    ///
    /// Checks per-node key-count bounds, strict key ordering within nodes
    /// and across subtree boundaries, child-count consistency, and uniform
    /// leaf depth. Intended as a diagnostic; not called on hot paths.
    pub fn validate(&self) -> CoreResult<()> {
        self.check_node(&self.root, true, None, None)?;
        Ok(())
    }

    fn check_node(
        &self,
        node: &Node,
        is_root: bool,
        lower: Option<&StoredKey>,
        upper: Option<&StoredKey>,
    ) -> CoreResult<usize> {
        let n = node.num_keys();
        if n > self.max_keys() {
            return Err(CoreError::corrupt_state(format!(
                "node has {n} keys, maximum is {}",
                self.max_keys()
            )));
        }
        if !is_root && n < self.t - 1 {
            return Err(CoreError::corrupt_state(format!(
                "non-root node has {n} keys, minimum is {}",
                self.t - 1
            )));
        }
        if is_root && !node.is_leaf && n == 0 {
            return Err(CoreError::corrupt_state("internal root without keys"));
        }

        for pair in node.entries.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(CoreError::corrupt_state(format!(
                    "keys out of order: {} before {}",
                    pair[0].key, pair[1].key
                )));
            }
        }
        if let (Some(lo), Some(first)) = (lower, node.entries.first()) {
            if first.key <= *lo {
                return Err(CoreError::corrupt_state("key below subtree lower bound"));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.entries.last()) {
            if last.key >= *hi {
                return Err(CoreError::corrupt_state("key above subtree upper bound"));
            }
        }

        if node.is_leaf {
            if !node.children.is_empty() {
                return Err(CoreError::corrupt_state("leaf node with children"));
            }
            return Ok(1);
        }

        if node.children.len() != n + 1 {
            return Err(CoreError::corrupt_state(format!(
                "internal node with {n} keys and {} children",
                node.children.len()
            )));
        }

        let mut depth = None;
        for (i, child_offset) in node.children.iter().enumerate() {
            let child = self.load(*child_offset)?;
            let lo = if i == 0 {
                lower
            } else {
                Some(&node.entries[i - 1].key)
            };
            let hi = if i == n {
                upper
            } else {
                Some(&node.entries[i].key)
            };
            let child_depth = self.check_node(&child, false, lo, hi)?;
            match depth {
                None => depth = Some(child_depth),
                Some(d) if d != child_depth => {
                    return Err(CoreError::corrupt_state("leaves at different depths"));
                }
                Some(_) => {}
            }
        }
        Ok(depth.unwrap_or(0) + 1)
    }
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("t", &self.t)
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}
