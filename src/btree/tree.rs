//! # B-Tree Operations
//!
//! Search, insert, delete, and range positioning over nodes managed by the
//! [`NodeManager`]. The tree itself is stateless beyond its manager and the
//! uniqueness flag; all node access goes through ids resolved by the
//! manager.
//!
//! ## Insert
//!
//! Descend from the root to a leaf, tracking nothing: child nodes know
//! their parent ids, so split propagation walks back up through those
//! links. In a unique tree an equal key anywhere on the descent is a
//! conflict, reported before any mutation. In a non-unique tree an equal
//! key at an internal node routes the descent into the child *at* the hit
//! index, so duplicates accumulate to the left of existing ones.
//!
//! An overflowing node (more than `2T` entries) splits around entry `T`:
//! the upper half moves into a fresh right sibling, the separator moves
//! up — into a brand-new root when the node was the root — and the parent
//! may split in turn.
//!
//! ## Delete
//!
//! A hit in a leaf is removed in place. A hit in an internal node is
//! swapped with its in-order predecessor (rightmost leaf entry of the left
//! subtree) and removed from that leaf. A non-root leaf left with fewer
//! than `T` entries rebalances: borrow from a sibling that can spare an
//! entry (rotation through the parent separator), otherwise merge with a
//! sibling, which may cascade upward and, at the top, replace an emptied
//! root with its lone child.
//!
//! ## Durability
//!
//! Every public mutation finishes with `save_changes`, so an acknowledged
//! insert or delete has its dirty nodes rewritten through the record layer
//! before returning.

use std::mem;

use eyre::{ensure, eyre, Result};
use smallvec::SmallVec;

use super::manager::{NodeManager, NodeRef};
use super::scan::{Direction, TreeScan};
use super::KeyExistsError;
use crate::encoding::Occurrence;

/// Inclusive/exclusive bound shapes of the four range scans.
#[derive(Debug, Clone, Copy)]
enum ScanBound {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

/// A B-tree over keys `K` and values `V`, stored through a node manager.
pub struct BTree<K, V> {
    manager: NodeManager<K, V>,
    unique: bool,
}

impl<K, V> BTree<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new(manager: NodeManager<K, V>, unique: bool) -> Self {
        Self { manager, unique }
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn manager(&self) -> &NodeManager<K, V> {
        &self.manager
    }

    /// Pushes buffered device writes down to the backing handle.
    pub fn sync(&self) -> Result<()> {
        self.manager.sync()
    }

    /// Finds an entry with an equal key. In a non-unique tree this is the
    /// first encountered member of the duplicate run.
    pub fn get(&self, key: &K) -> Result<Option<(K, V)>> {
        let mut node = self.manager.root()?;
        loop {
            let step = {
                let n = node.borrow();
                match n.search_occurrence(key, Occurrence::First) {
                    Ok(i) => return Ok(Some(n.entries()[i].clone())),
                    Err(i) => {
                        if n.is_leaf() {
                            None
                        } else {
                            Some(n.child_at(i))
                        }
                    }
                }
            };
            match step {
                None => return Ok(None),
                Some(child) => node = self.load(child)?,
            }
        }
    }

    /// Inserts an entry. A unique tree rejects an equal key with
    /// [`KeyExistsError`] before mutating anything.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let (node, position) = self.find_node_for_insertion(&key)?;
        let index = match position {
            Ok(_) if self.unique => return Err(KeyExistsError.into()),
            Ok(i) => i,
            Err(i) => i,
        };

        node.borrow_mut().insert_entry_at(index, (key, value));
        self.manager.mark_dirty(&node);

        if node.borrow().is_overflow(self.manager.min_entries()) {
            self.split(node)?;
        }
        self.manager.save_changes()
    }

    /// Removes the entry with an equal key from a unique tree.
    pub fn delete(&mut self, key: &K) -> Result<bool> {
        ensure!(self.unique, "delete by key alone requires a unique tree");

        enum Step {
            Hit(usize),
            Descend(u32),
            Miss,
        }

        let mut node = self.manager.root()?;
        let (node, index) = loop {
            let step = {
                let n = node.borrow();
                match n.search(key) {
                    Ok(i) => Step::Hit(i),
                    Err(_) if n.is_leaf() => Step::Miss,
                    Err(i) => Step::Descend(n.child_at(i)),
                }
            };
            match step {
                Step::Hit(i) => break (node, i),
                Step::Miss => return Ok(false),
                Step::Descend(child) => node = self.load(child)?,
            }
        };

        self.remove_at(&node, index)?;
        self.manager.save_changes()?;
        Ok(true)
    }

    /// Removes the first entry matching both key and value from a
    /// non-unique tree, repeating until no further entry matches. Returns
    /// whether anything was removed.
    pub fn delete_entry(&mut self, key: &K, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        ensure!(
            !self.unique,
            "delete by key and value requires a non-unique tree"
        );

        let mut removed = false;
        loop {
            let Some((node, index)) = self.locate_entry(key, value)? else {
                break;
            };
            self.remove_at(&node, index)?;
            removed = true;
        }

        self.manager.save_changes()?;
        Ok(removed)
    }

    /// Ascending scan over entries with keys strictly greater than `key`.
    pub fn larger_than(&self, key: &K) -> Result<TreeScan<'_, K, V>> {
        self.scan(key, ScanBound::Greater)
    }

    /// Ascending scan over entries with keys greater than or equal to
    /// `key`.
    pub fn larger_than_or_equal(&self, key: &K) -> Result<TreeScan<'_, K, V>> {
        self.scan(key, ScanBound::GreaterOrEqual)
    }

    /// Descending scan over entries with keys strictly less than `key`.
    pub fn less_than(&self, key: &K) -> Result<TreeScan<'_, K, V>> {
        self.scan(key, ScanBound::Less)
    }

    /// Descending scan over entries with keys less than or equal to `key`.
    pub fn less_than_or_equal(&self, key: &K) -> Result<TreeScan<'_, K, V>> {
        self.scan(key, ScanBound::LessOrEqual)
    }

    fn scan(&self, key: &K, bound: ScanBound) -> Result<TreeScan<'_, K, V>> {
        let move_left = matches!(bound, ScanBound::GreaterOrEqual | ScanBound::Less);
        let (leaf, position) = self.find_node_for_iteration(key, move_left)?;

        // The start index may land outside the leaf; the scan's first
        // advance climbs to the proper ancestor entry.
        let start: isize = match bound {
            ScanBound::GreaterOrEqual => match position {
                Ok(i) => i as isize,
                Err(i) => i as isize,
            },
            ScanBound::Greater => match position {
                Ok(i) => i as isize + 1,
                Err(i) => i as isize,
            },
            ScanBound::LessOrEqual => match position {
                Ok(i) => i as isize,
                Err(i) => i as isize - 1,
            },
            ScanBound::Less => match position {
                Ok(i) => i as isize - 1,
                Err(i) => i as isize - 1,
            },
        };

        let direction = match bound {
            ScanBound::Greater | ScanBound::GreaterOrEqual => Direction::Ascending,
            ScanBound::Less | ScanBound::LessOrEqual => Direction::Descending,
        };
        Ok(TreeScan::new(&self.manager, (leaf, start), direction))
    }

    /// Descends to the node an insert of `key` would mutate. Returns the
    /// node and the search result inside it: a leaf with the insertion (or
    /// duplicate) index, or — in a unique tree — an internal node holding
    /// the conflicting key.
    fn find_node_for_insertion(
        &self,
        key: &K,
    ) -> Result<(NodeRef<K, V>, std::result::Result<usize, usize>)> {
        let mut node = self.manager.root()?;
        loop {
            let (position, descend) = {
                let n = node.borrow();
                let position = if self.unique {
                    n.search(key)
                } else {
                    n.search_occurrence(key, Occurrence::First)
                };
                if n.is_leaf() {
                    (position, None)
                } else {
                    match position {
                        // Unique internal hit: stop, insert will raise.
                        Ok(_) if self.unique => (position, None),
                        // Duplicate route: descend at the hit index so the
                        // new entry lands left of existing equals.
                        Ok(i) => (position, Some(n.child_at(i))),
                        Err(i) => (position, Some(n.child_at(i))),
                    }
                }
            };
            match descend {
                None => return Ok((node, position)),
                Some(child) => node = self.load(child)?,
            }
        }
    }

    /// Descends to the leaf bounding `key` for iteration. Equal-key hits
    /// at internal nodes keep descending toward the run's first
    /// (`move_left`) or last member.
    fn find_node_for_iteration(
        &self,
        key: &K,
        move_left: bool,
    ) -> Result<(NodeRef<K, V>, std::result::Result<usize, usize>)> {
        let occurrence = if move_left {
            Occurrence::First
        } else {
            Occurrence::Last
        };

        let mut node = self.manager.root()?;
        loop {
            let (position, descend) = {
                let n = node.borrow();
                let position = n.search_occurrence(key, occurrence);
                if n.is_leaf() {
                    (position, None)
                } else {
                    let child = match position {
                        Ok(i) if move_left => n.child_at(i),
                        Ok(i) => n.child_at(i + 1),
                        Err(i) => n.child_at(i),
                    };
                    (position, Some(child))
                }
            };
            match descend {
                None => return Ok((node, position)),
                Some(child) => node = self.load(child)?,
            }
        }
    }

    /// Splits an overflowing node around entry `T` and propagates upward.
    fn split(&mut self, node: NodeRef<K, V>) -> Result<()> {
        let t = self.manager.min_entries();

        let (separator, right_entries, right_children, node_id, parent_id) = {
            let mut n = node.borrow_mut();
            debug_assert!(n.is_overflow(t));
            let right_entries = n.entries_mut().split_off(t + 1);
            let separator = n
                .entries_mut()
                .pop()
                .ok_or_else(|| eyre!("split of node {} with no separator entry", n.id()))?;
            let right_children = if n.is_leaf() {
                Vec::new()
            } else {
                n.children_mut().split_off(t + 1)
            };
            (separator, right_entries, right_children, n.id(), n.parent_id())
        };

        let right = self.manager.create(right_entries, right_children)?;
        let right_id = right.borrow().id();
        self.manager.mark_dirty(&node);

        let moved: SmallVec<[u32; 8]> = right.borrow().children().iter().copied().collect();
        for child_id in moved {
            let child = self.load(child_id)?;
            child.borrow_mut().set_parent_id(right_id);
            self.manager.mark_dirty(&child);
        }

        if parent_id == 0 {
            let root = self.manager.create_root(separator.0, separator.1, node_id, right_id)?;
            let root_id = root.borrow().id();
            node.borrow_mut().set_parent_id(root_id);
            right.borrow_mut().set_parent_id(root_id);
            self.manager.mark_dirty(&node);
            self.manager.mark_dirty(&right);
            return Ok(());
        }

        let parent = self.load(parent_id)?;
        right.borrow_mut().set_parent_id(parent_id);
        self.manager.mark_dirty(&right);
        {
            let mut p = parent.borrow_mut();
            let at = p
                .child_index_of(node_id)
                .ok_or_else(|| eyre!("node {} missing from parent {}", node_id, parent_id))?;
            p.insert_entry_at(at, separator);
            p.children_mut().insert(at + 1, right_id);
        }
        self.manager.mark_dirty(&parent);

        if parent.borrow().is_overflow(t) {
            self.split(parent)?;
        }
        Ok(())
    }

    /// Removes the entry at `index` of `node`, handling the internal-node
    /// case by swapping with the in-order predecessor, then rebalances.
    fn remove_at(&mut self, node: &NodeRef<K, V>, index: usize) -> Result<()> {
        if node.borrow().is_leaf() {
            node.borrow_mut().remove_entry_at(index)?;
            self.manager.mark_dirty(node);
            return self.rebalance_if_needed(node);
        }

        // Internal hit: replace with the rightmost entry of the left
        // subtree and remove it from its leaf.
        let left_child = node.borrow().child_at(index);
        let mut current = self.load(left_child)?;
        loop {
            let next = {
                let n = current.borrow();
                if n.is_leaf() {
                    None
                } else {
                    Some(n.child_at(n.children().len() - 1))
                }
            };
            match next {
                None => break,
                Some(id) => current = self.load(id)?,
            }
        }

        let predecessor = {
            let mut leaf = current.borrow_mut();
            let last = leaf.entry_count().checked_sub(1).ok_or_else(|| {
                eyre!("leaf {} on the predecessor spine is empty", leaf.id())
            })?;
            leaf.remove_entry_at(last)?
        };
        node.borrow_mut().entries_mut()[index] = predecessor;
        self.manager.mark_dirty(node);
        self.manager.mark_dirty(&current);
        self.rebalance_if_needed(&current)
    }

    fn rebalance_if_needed(&mut self, node: &NodeRef<K, V>) -> Result<()> {
        let (underflow, parent_id) = {
            let n = node.borrow();
            (n.is_underflow(self.manager.min_entries()), n.parent_id())
        };
        if underflow && parent_id != 0 {
            self.rebalance(node, parent_id)?;
        }
        Ok(())
    }

    /// Restores the `T..=2T` invariant of an underfull non-root node by
    /// borrowing from a sibling or merging with one.
    fn rebalance(&mut self, node: &NodeRef<K, V>, parent_id: u32) -> Result<()> {
        let t = self.manager.min_entries();
        let parent = self.load(parent_id)?;
        let node_id = node.borrow().id();
        let at = parent
            .borrow()
            .child_index_of(node_id)
            .ok_or_else(|| eyre!("node {} missing from parent {}", node_id, parent_id))?;

        let right_id = {
            let p = parent.borrow();
            (at + 1 < p.children().len()).then(|| p.child_at(at + 1))
        };
        if let Some(right_id) = right_id {
            let right = self.load(right_id)?;
            if right.borrow().entry_count() > t {
                return self.rotate_left(node, &parent, &right, at);
            }
        }

        let left_id = (at > 0).then(|| parent.borrow().child_at(at - 1));
        if let Some(left_id) = left_id {
            let left = self.load(left_id)?;
            if left.borrow().entry_count() > t {
                return self.rotate_right(node, &parent, &left, at);
            }
        }

        if let Some(right_id) = right_id {
            let right = self.load(right_id)?;
            self.merge(node, &right, &parent, at)
        } else {
            let left_id =
                left_id.ok_or_else(|| eyre!("underfull node {} has no siblings", node_id))?;
            let left = self.load(left_id)?;
            self.merge(&left, node, &parent, at - 1)
        }
    }

    /// Borrows one entry from the right sibling through the parent
    /// separator at `at`.
    fn rotate_left(
        &mut self,
        node: &NodeRef<K, V>,
        parent: &NodeRef<K, V>,
        right: &NodeRef<K, V>,
        at: usize,
    ) -> Result<()> {
        let first = right.borrow_mut().remove_entry_at(0)?;
        let separator = mem::replace(&mut parent.borrow_mut().entries_mut()[at], first);
        node.borrow_mut().entries_mut().push(separator);

        let moved = {
            let mut r = right.borrow_mut();
            if r.is_leaf() {
                None
            } else {
                Some(r.children_mut().remove(0))
            }
        };
        if let Some(child_id) = moved {
            node.borrow_mut().children_mut().push(child_id);
            let child = self.load(child_id)?;
            child.borrow_mut().set_parent_id(node.borrow().id());
            self.manager.mark_dirty(&child);
        }

        self.manager.mark_dirty(node);
        self.manager.mark_dirty(parent);
        self.manager.mark_dirty(right);
        Ok(())
    }

    /// Borrows one entry from the left sibling through the parent
    /// separator at `at - 1`.
    fn rotate_right(
        &mut self,
        node: &NodeRef<K, V>,
        parent: &NodeRef<K, V>,
        left: &NodeRef<K, V>,
        at: usize,
    ) -> Result<()> {
        let last = {
            let mut l = left.borrow_mut();
            let index = l.entry_count() - 1;
            l.remove_entry_at(index)?
        };
        let separator = mem::replace(&mut parent.borrow_mut().entries_mut()[at - 1], last);
        node.borrow_mut().entries_mut().insert(0, separator);

        let moved = {
            let mut l = left.borrow_mut();
            if l.is_leaf() {
                None
            } else {
                l.children_mut().pop()
            }
        };
        if let Some(child_id) = moved {
            node.borrow_mut().children_mut().insert(0, child_id);
            let child = self.load(child_id)?;
            child.borrow_mut().set_parent_id(node.borrow().id());
            self.manager.mark_dirty(&child);
        }

        self.manager.mark_dirty(node);
        self.manager.mark_dirty(parent);
        self.manager.mark_dirty(left);
        Ok(())
    }

    /// Folds the parent separator at `separator_at` and the right node
    /// into the left node, deleting the right node. May cascade upward.
    fn merge(
        &mut self,
        left: &NodeRef<K, V>,
        right: &NodeRef<K, V>,
        parent: &NodeRef<K, V>,
        separator_at: usize,
    ) -> Result<()> {
        let t = self.manager.min_entries();

        let separator = {
            let mut p = parent.borrow_mut();
            let separator = p.remove_entry_at(separator_at)?;
            p.children_mut().remove(separator_at + 1);
            separator
        };

        let (left_id, moved) = {
            let mut l = left.borrow_mut();
            let mut r = right.borrow_mut();
            l.entries_mut().push(separator);
            l.entries_mut().append(r.entries_mut());
            let moved: SmallVec<[u32; 8]> = r.children_mut().drain(..).collect();
            l.children_mut().extend(moved.iter().copied());
            (l.id(), moved)
        };
        for child_id in moved {
            let child = self.load(child_id)?;
            child.borrow_mut().set_parent_id(left_id);
            self.manager.mark_dirty(&child);
        }

        self.manager.mark_dirty(left);
        self.manager.mark_dirty(parent);
        self.manager.delete(right)?;

        let (parent_is_root, parent_len, grandparent_id) = {
            let p = parent.borrow();
            (p.parent_id() == 0, p.entry_count(), p.parent_id())
        };
        if parent_is_root {
            if parent_len == 0 {
                // The root drained into the merged child: promote it.
                self.manager.make_root(left)?;
                self.manager.delete(parent)?;
            }
            return Ok(());
        }
        if parent_len < t {
            self.rebalance(parent, grandparent_id)?;
        }
        Ok(())
    }

    /// Position of the first entry equal on both key and value, scanning
    /// the duplicate run in ascending order.
    fn locate_entry(&self, key: &K, value: &V) -> Result<Option<(NodeRef<K, V>, usize)>>
    where
        V: PartialEq,
    {
        let mut scan = self.larger_than_or_equal(key)?;
        while let Some((node, index)) = scan.next_position()? {
            let outcome = {
                let n = node.borrow();
                let (entry_key, entry_value) = &n.entries()[index];
                if entry_key > key {
                    Some(None)
                } else if entry_value == value {
                    Some(Some(index))
                } else {
                    None
                }
            };
            match outcome {
                Some(None) => return Ok(None),
                Some(Some(index)) => return Ok(Some((node, index))),
                None => continue,
            }
        }
        Ok(None)
    }

    fn load(&self, id: u32) -> Result<NodeRef<K, V>> {
        self.manager
            .find(id)?
            .ok_or_else(|| eyre!("child node {} is missing", id))
    }
}

impl<K, V> std::fmt::Debug for BTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("unique", &self.unique)
            .field("manager", &"NodeManager")
            .finish()
    }
}
