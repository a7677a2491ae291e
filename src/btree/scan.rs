//! # Range Scans
//!
//! Lazy, single-pass, non-restartable iteration over a key range, in
//! ascending or descending key order. A scan holds a cursor of
//! `(node, index)`; yielding an entry computes its in-order successor (or
//! predecessor) eagerly:
//!
//! - at a leaf, the index just advances; when it runs off the node, the
//!   cursor climbs to the parent, positioned at the entry that separates
//!   this child from the next, repeating until an entry is found or the
//!   root is exhausted;
//! - at an internal position, the cursor descends through the adjacent
//!   child's leftmost (ascending) or rightmost (descending) spine to a
//!   leaf.
//!
//! The cursor's start index may lie outside the node's entries; the first
//! advance normalizes it by climbing, which is how boundary positions like
//! "past the last entry of this leaf" resolve to the right ancestor entry.
//!
//! Mutating the tree while a scan is alive is not supported.

use eyre::{eyre, Result};

use super::manager::{NodeManager, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Ascending,
    Descending,
}

/// Lazy iterator over `(key, value)` entries of one tree.
pub struct TreeScan<'t, K, V> {
    manager: &'t NodeManager<K, V>,
    cursor: Option<(NodeRef<K, V>, isize)>,
    direction: Direction,
    failed: bool,
}

impl<'t, K, V> TreeScan<'t, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub(crate) fn new(
        manager: &'t NodeManager<K, V>,
        start: (NodeRef<K, V>, isize),
        direction: Direction,
    ) -> Self {
        Self {
            manager,
            cursor: Some(start),
            direction,
            failed: false,
        }
    }

    /// Advances to the next entry and returns its position, or `None` when
    /// the traversal is exhausted.
    pub(crate) fn next_position(&mut self) -> Result<Option<(NodeRef<K, V>, usize)>> {
        loop {
            let Some((node, index)) = self.cursor.take() else {
                return Ok(None);
            };

            let entry_count = node.borrow().entry_count() as isize;
            if (0..entry_count).contains(&index) {
                self.cursor = self.step_past(&node, index)?;
                return Ok(Some((node, index as usize)));
            }

            // Ran off the node: climb to the parent entry adjoining this
            // child.
            let (node_id, parent_id) = {
                let n = node.borrow();
                (n.id(), n.parent_id())
            };
            if parent_id == 0 {
                return Ok(None);
            }
            let parent = self
                .manager
                .find(parent_id)?
                .ok_or_else(|| eyre!("parent node {} is missing", parent_id))?;
            let child_pos = parent
                .borrow()
                .child_index_of(node_id)
                .ok_or_else(|| eyre!("node {} missing from parent {}", node_id, parent_id))?
                as isize;

            self.cursor = Some(match self.direction {
                Direction::Ascending => (parent, child_pos),
                Direction::Descending => (parent, child_pos - 1),
            });
        }
    }

    /// In-order successor (ascending) or predecessor (descending) of a
    /// valid position.
    fn step_past(
        &self,
        node: &NodeRef<K, V>,
        index: isize,
    ) -> Result<Option<(NodeRef<K, V>, isize)>> {
        let (is_leaf, adjacent_child) = {
            let n = node.borrow();
            if n.is_leaf() {
                (true, 0)
            } else {
                let child = match self.direction {
                    Direction::Ascending => n.child_at(index as usize + 1),
                    Direction::Descending => n.child_at(index as usize),
                };
                (false, child)
            }
        };

        if is_leaf {
            let next = match self.direction {
                Direction::Ascending => index + 1,
                Direction::Descending => index - 1,
            };
            return Ok(Some((NodeRef::clone(node), next)));
        }

        // Descend the adjacent subtree's spine down to a leaf.
        let mut current = self.load(adjacent_child)?;
        loop {
            let next = {
                let n = current.borrow();
                if n.is_leaf() {
                    None
                } else {
                    Some(match self.direction {
                        Direction::Ascending => n.child_at(0),
                        Direction::Descending => n.child_at(n.children().len() - 1),
                    })
                }
            };
            match next {
                None => break,
                Some(id) => current = self.load(id)?,
            }
        }

        let start = match self.direction {
            Direction::Ascending => 0,
            Direction::Descending => current.borrow().entry_count() as isize - 1,
        };
        Ok(Some((current, start)))
    }

    fn load(&self, id: u32) -> Result<NodeRef<K, V>> {
        self.manager
            .find(id)?
            .ok_or_else(|| eyre!("child node {} is missing", id))
    }
}

impl<K, V> Iterator for TreeScan<'_, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_position() {
            Ok(None) => None,
            Ok(Some((node, index))) => Some(Ok(node.borrow().entries()[index].clone())),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl<K, V> std::fmt::Debug for TreeScan<'_, K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeScan")
            .field("direction", &self.direction)
            .field("exhausted", &self.cursor.is_none())
            .finish()
    }
}
