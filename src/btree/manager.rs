//! # Node Manager
//!
//! The lifetime layer between the tree and the record store. The tree works
//! with `Rc<RefCell<TreeNode>>` handles; the manager loads nodes from
//! records on demand, keeps them discoverable while anyone holds them, and
//! persists the dirty ones on `save_changes`.
//!
//! ## Caching
//!
//! Two structures cooperate:
//!
//! - a **weak map** from node id to `Weak` handle. While any owner keeps a
//!   node alive, `find` returns that same instance, so every part of an
//!   operation observes the same in-memory state. Dead entries are swept
//!   every `WEAK_SWEEP_INTERVAL` inserts.
//! - a **strong FIFO** of recently loaded nodes (capacity
//!   `NODE_CACHE_CAPACITY`) that keeps hot nodes from being dropped and
//!   re-deserialized. When it fills, the older half is released.
//!
//! Dirty nodes are additionally held strongly in the dirty map, so an
//! unflushed node can never be dropped regardless of FIFO pressure.
//!
//! ## Root Pinning
//!
//! Record 1 of the index file holds the current root node id as a 4-byte
//! little-endian integer. A fresh file gets record 1 created with payload
//! `2` and an empty root node stored as record 2. `make_root` rewrites
//! record 1 whenever a split or merge changes the root.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;

use super::codec::NodeCodec;
use super::node::TreeNode;
use crate::config::{
    INITIAL_ROOT_NODE_ID, NODE_CACHE_CAPACITY, ROOT_POINTER_RECORD_ID, WEAK_SWEEP_INTERVAL,
};
use crate::storage::RecordStore;

/// Shared handle to a loaded tree node.
pub type NodeRef<K, V> = Rc<RefCell<TreeNode<K, V>>>;

/// Loads, caches, and persists tree nodes through the record store.
pub struct NodeManager<K, V> {
    records: Rc<RecordStore>,
    codec: NodeCodec<K, V>,
    min_entries: usize,
    root: RefCell<Option<NodeRef<K, V>>>,
    loaded: RefCell<HashMap<u32, Weak<RefCell<TreeNode<K, V>>>>>,
    recent: RefCell<VecDeque<NodeRef<K, V>>>,
    dirty: RefCell<HashMap<u32, NodeRef<K, V>>>,
    inserts: Cell<usize>,
}

impl<K, V> NodeManager<K, V>
where
    K: Ord,
{
    /// Opens the node manager over a record store, pinning the root.
    ///
    /// A fresh file is initialized with the root pointer record and an
    /// empty root node.
    pub fn new(
        records: Rc<RecordStore>,
        codec: NodeCodec<K, V>,
        min_entries: usize,
    ) -> Result<Self> {
        ensure!(min_entries >= 1, "a tree needs at least one entry per node");

        let manager = Self {
            records,
            codec,
            min_entries,
            root: RefCell::new(None),
            loaded: RefCell::new(HashMap::new()),
            recent: RefCell::new(VecDeque::with_capacity(NODE_CACHE_CAPACITY)),
            dirty: RefCell::new(HashMap::new()),
            inserts: Cell::new(0),
        };

        match manager.records.find(ROOT_POINTER_RECORD_ID)? {
            Some(payload) => {
                ensure!(
                    payload.len() == 4,
                    "root pointer record holds {} bytes, expected 4",
                    payload.len()
                );
                let root_id = u32::from_le_bytes(payload.as_slice().try_into().unwrap());
                let root = manager
                    .find(root_id)?
                    .ok_or_else(|| eyre!("root node {} is missing", root_id))?;
                *manager.root.borrow_mut() = Some(root);
            }
            None => {
                let pointer_id = manager
                    .records
                    .create_bytes(&INITIAL_ROOT_NODE_ID.to_le_bytes())?;
                ensure!(
                    pointer_id == ROOT_POINTER_RECORD_ID,
                    "index file is not empty: root pointer landed at record {}",
                    pointer_id
                );

                let root = manager.create(Vec::new(), Vec::new())?;
                ensure!(
                    root.borrow().id() == INITIAL_ROOT_NODE_ID,
                    "initial root landed at record {}",
                    root.borrow().id()
                );
                *manager.root.borrow_mut() = Some(root);
            }
        }

        Ok(manager)
    }

    /// T: the minimum entry count of non-root nodes.
    pub fn min_entries(&self) -> usize {
        self.min_entries
    }

    /// The pinned root node.
    pub fn root(&self) -> Result<NodeRef<K, V>> {
        self.root
            .borrow()
            .clone()
            .ok_or_else(|| eyre!("root node is not pinned"))
    }

    /// Creates a node backed by a fresh record. The record allocator picks
    /// the id, so the node body is generated once the id is known.
    pub fn create(&self, entries: Vec<(K, V)>, children: Vec<u32>) -> Result<NodeRef<K, V>> {
        let built: RefCell<Option<TreeNode<K, V>>> = RefCell::new(None);

        let id = self.records.create_with(|id| {
            let node = TreeNode::new(id, 0, entries, children);
            let bytes = self.codec.serialize(&node)?;
            built.replace(Some(node));
            Ok(bytes)
        })?;

        let node = built
            .into_inner()
            .ok_or_else(|| eyre!("record generator was not invoked for node {}", id))?;
        let node = Rc::new(RefCell::new(node));
        self.cache_insert(&node);
        Ok(node)
    }

    /// Loads node `id`, returning the already-loaded instance when one is
    /// alive. Id 0 means "no node" and reads as absent.
    pub fn find(&self, id: u32) -> Result<Option<NodeRef<K, V>>> {
        if id == 0 {
            return Ok(None);
        }
        if let Some(node) = self.loaded.borrow().get(&id).and_then(Weak::upgrade) {
            return Ok(Some(node));
        }

        let Some(bytes) = self.records.find(id)? else {
            return Ok(None);
        };
        let node = Rc::new(RefCell::new(self.codec.deserialize(id, &bytes)?));
        self.cache_insert(&node);
        Ok(Some(node))
    }

    /// Registers a node as modified; it will be rewritten by the next
    /// `save_changes` and cannot be dropped until then.
    pub fn mark_dirty(&self, node: &NodeRef<K, V>) {
        let id = node.borrow().id();
        self.dirty.borrow_mut().insert(id, Rc::clone(node));
    }

    /// Rewrites every dirty node through the record store and clears the
    /// dirty set.
    pub fn save_changes(&self) -> Result<()> {
        let mut pending: Vec<(u32, NodeRef<K, V>)> = self.dirty.borrow_mut().drain().collect();
        pending.sort_by_key(|(id, _)| *id);

        for (id, node) in pending {
            let bytes = self.codec.serialize(&node.borrow())?;
            self.records.update(id, &bytes)?;
        }
        Ok(())
    }

    /// Deletes a node's backing record and forgets it. Deleting the root
    /// leaves the root slot empty until the next `make_root`.
    pub fn delete(&self, node: &NodeRef<K, V>) -> Result<()> {
        let id = node.borrow().id();

        self.records.delete(id)?;
        self.dirty.borrow_mut().remove(&id);
        self.loaded.borrow_mut().remove(&id);
        self.recent.borrow_mut().retain(|n| n.borrow().id() != id);

        let is_root = self
            .root
            .borrow()
            .as_ref()
            .is_some_and(|root| root.borrow().id() == id);
        if is_root {
            *self.root.borrow_mut() = None;
        }
        Ok(())
    }

    /// Creates a fresh root holding one separator entry and two children,
    /// and repins the root pointer to it.
    pub fn create_root(&self, key: K, value: V, left: u32, right: u32) -> Result<NodeRef<K, V>> {
        let root = self.create(vec![(key, value)], vec![left, right])?;
        self.make_root(&root)?;
        Ok(root)
    }

    /// Pins `node` as the root: rewrites record 1's payload and clears the
    /// node's parent link.
    pub fn make_root(&self, node: &NodeRef<K, V>) -> Result<()> {
        let id = node.borrow().id();
        node.borrow_mut().set_parent_id(0);
        self.records
            .update(ROOT_POINTER_RECORD_ID, &id.to_le_bytes())?;
        *self.root.borrow_mut() = Some(Rc::clone(node));
        self.mark_dirty(node);
        Ok(())
    }

    /// Pushes buffered device writes down to the backing handle.
    pub fn sync(&self) -> Result<()> {
        self.records.sync()
    }

    fn cache_insert(&self, node: &NodeRef<K, V>) {
        let id = node.borrow().id();
        self.loaded.borrow_mut().insert(id, Rc::downgrade(node));

        let mut recent = self.recent.borrow_mut();
        recent.push_back(Rc::clone(node));
        if recent.len() >= NODE_CACHE_CAPACITY {
            while recent.len() > NODE_CACHE_CAPACITY / 2 {
                recent.pop_front();
            }
        }
        drop(recent);

        let inserts = self.inserts.get() + 1;
        self.inserts.set(inserts);
        if inserts % WEAK_SWEEP_INTERVAL == 0 {
            self.loaded
                .borrow_mut()
                .retain(|_, weak| weak.strong_count() > 0);
        }
    }
}

impl<K, V> std::fmt::Debug for NodeManager<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeManager")
            .field("min_entries", &self.min_entries)
            .field("loaded", &self.loaded.borrow().len())
            .field("dirty", &self.dirty.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::codec::U32Codec;
    use crate::storage::{BlockConfig, BlockStore, FileDevice, RecordStore};
    use std::path::Path;

    fn open_manager(path: &Path) -> NodeManager<u32, u32> {
        let device = FileDevice::open(path).unwrap();
        let blocks = BlockStore::new(Box::new(device), BlockConfig::new(256, 48).unwrap()).unwrap();
        let records = Rc::new(RecordStore::new(blocks).unwrap());
        let codec = NodeCodec::new(Box::new(U32Codec), Box::new(U32Codec)).unwrap();
        NodeManager::new(records, codec, 2).unwrap()
    }

    #[test]
    fn fresh_file_pins_empty_root_at_record_two() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir.path().join("idx"));

        let root = manager.root().unwrap();

        assert_eq!(root.borrow().id(), INITIAL_ROOT_NODE_ID);
        assert_eq!(root.borrow().entry_count(), 0);
        assert!(root.borrow().is_leaf());
    }

    #[test]
    fn reopen_finds_persisted_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");

        {
            let manager = open_manager(&path);
            let root = manager.root().unwrap();
            root.borrow_mut().entries_mut().push((5, 50));
            manager.mark_dirty(&root);
            manager.save_changes().unwrap();
        }

        let manager = open_manager(&path);
        let root = manager.root().unwrap();
        assert_eq!(root.borrow().entries(), &[(5, 50)]);
    }

    #[test]
    fn create_assigns_record_id_to_node() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir.path().join("idx"));

        let node = manager.create(vec![(1, 10)], vec![]).unwrap();

        // Records 0..=2 are reserved/bootstrap; the first extra node is 3.
        assert_eq!(node.borrow().id(), 3);
        let found = manager.find(3).unwrap().unwrap();
        assert!(Rc::ptr_eq(&node, &found));
    }

    #[test]
    fn find_of_id_zero_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir.path().join("idx"));

        assert!(manager.find(0).unwrap().is_none());
    }

    #[test]
    fn dirty_nodes_survive_until_save_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");

        {
            let manager = open_manager(&path);
            let node = manager.create(vec![(1, 10)], vec![]).unwrap();
            let id = node.borrow().id();
            node.borrow_mut().entries_mut().push((2, 20));
            manager.mark_dirty(&node);
            drop(node);

            // Still reachable through the dirty map.
            let reloaded = manager.find(id).unwrap().unwrap();
            assert_eq!(reloaded.borrow().entry_count(), 2);
            manager.save_changes().unwrap();
        }

        let manager = open_manager(&path);
        let node = manager.find(3).unwrap().unwrap();
        assert_eq!(node.borrow().entries(), &[(1, 10), (2, 20)]);
    }

    #[test]
    fn unsaved_changes_are_lost_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");

        {
            let manager = open_manager(&path);
            let root = manager.root().unwrap();
            root.borrow_mut().entries_mut().push((9, 90));
            // No mark_dirty, no save_changes.
        }

        let manager = open_manager(&path);
        assert_eq!(manager.root().unwrap().borrow().entry_count(), 0);
    }

    #[test]
    fn make_root_repins_through_record_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");

        {
            let manager = open_manager(&path);
            let new_root = manager.create(vec![(7, 70)], vec![]).unwrap();
            manager.make_root(&new_root).unwrap();
            manager.save_changes().unwrap();
        }

        let manager = open_manager(&path);
        let root = manager.root().unwrap();
        assert_eq!(root.borrow().entries(), &[(7, 70)]);
        assert_eq!(root.borrow().parent_id(), 0);
    }

    #[test]
    fn delete_of_root_unpins_it() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open_manager(&dir.path().join("idx"));
        let root = manager.root().unwrap();

        manager.delete(&root).unwrap();

        assert!(manager.root().is_err());
        assert!(manager.find(INITIAL_ROOT_NODE_ID).unwrap().is_none());
    }
}
