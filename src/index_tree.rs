// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Index Tree
//!
//! A generic ordered tree with size-based linear indexing. It knows nothing about CRDTs; it
//! converts between three ways of addressing a location in a document:
//!
//! - a flat integer **index**,
//! - a **path** of per-level child offsets whose last element is an offset inside the addressed
//!   node, and
//! - a [`TreePos`], a node and an offset inside it.
//!
//! Every element occupies its content size plus two (its open and close "tags") in index space;
//! text occupies its length. For example, in `<root><p>ab</p><b></b></root>` the index `0` is
//! before `<p>`, `1` is before `a`, `3` is after `b` and before `</p>`, and `6` is the end.
//!
//! Nodes may be tombstoned. A tombstoned node stays linked into its parent (so that positions
//! relative to it can still be resolved) but is excluded from sizes, indexing and traversal.
//!
//! Nodes live in an arena and are addressed by [`NodeKey`]s. The parent's child list is the only
//! owner of a node; the child-to-parent link is a plain key.
use crate::error::TreeError;
use smallvec::SmallVec;
use std::fmt;

/// The children of an element, tombstones included.
pub type ChildList = SmallVec<[NodeKey; 4]>;

/// A stable handle to a node in an [`IndexTree`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(u32);

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl NodeKey {
    fn slot(self) -> usize {
        self.0 as usize
    }
}

/// What the [`IndexTree`] needs to know about the nodes it holds.
pub trait IndexNode {
    /// Text nodes hold a value and never have children.
    fn is_text(&self) -> bool;

    /// The length of a text node's value; ignored for elements.
    fn text_len(&self) -> usize;

    fn is_removed(&self) -> bool;

    /// All children in document order, tombstones included. Empty for text nodes.
    fn children(&self) -> &[NodeKey];

    /// `None` for text nodes.
    fn children_mut(&mut self) -> Option<&mut ChildList>;
}

/// A location in the tree: an offset inside `node`.
///
/// For text nodes the offset counts characters, for elements it counts live children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreePos {
    pub node: NodeKey,
    pub offset: usize,
}

#[derive(Clone, Debug)]
struct Slot<N> {
    node: N,
    parent: Option<NodeKey>,
    /// Sum of the padded sizes of the live children; unused for text.
    size: usize,
}

/// An arena of nodes forming an ordered tree rooted at [`IndexTree::root`].
#[derive(Clone, Debug)]
pub struct IndexTree<N> {
    slots: Vec<Option<Slot<N>>>,
    root: NodeKey,
    len: usize,
}

impl<N: IndexNode> IndexTree<N> {
    /// Creates a tree holding only `root`, which must not have children yet.
    pub fn new(root: N) -> Self {
        debug_assert!(root.children().is_empty(), "root is built through insert_at");
        Self {
            slots: vec![Some(Slot {
                node: root,
                parent: None,
                size: 0,
            })],
            root: NodeKey(0),
            len: 1,
        }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// The number of nodes in the arena, tombstones included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, key: NodeKey) -> &Slot<N> {
        self.slots[key.slot()]
            .as_ref()
            .expect("keys are only handed out for occupied slots")
    }

    fn slot_mut(&mut self, key: NodeKey) -> &mut Slot<N> {
        self.slots[key.slot()]
            .as_mut()
            .expect("keys are only handed out for occupied slots")
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.slots.get(key.slot()).is_some_and(Option::is_some)
    }

    pub fn get(&self, key: NodeKey) -> &N {
        &self.slot(key).node
    }

    /// Mutable access to a node.
    ///
    /// The caller must not change the node's liveness, text length or children through this;
    /// [`IndexTree::remove_node`], [`IndexTree::resize_text`] and the linking methods keep the
    /// sizes consistent.
    pub fn get_mut(&mut self, key: NodeKey) -> &mut N {
        &mut self.slot_mut(key).node
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.slot(key).parent
    }

    pub fn is_text(&self, key: NodeKey) -> bool {
        self.get(key).is_text()
    }

    pub fn is_removed(&self, key: NodeKey) -> bool {
        self.get(key).is_removed()
    }

    /// The content size of a node: its text length, or the padded sizes of its live children.
    pub fn size(&self, key: NodeKey) -> usize {
        let slot = self.slot(key);
        if slot.node.is_text() {
            slot.node.text_len()
        } else {
            slot.size
        }
    }

    /// The index-space footprint of a node inside its parent.
    pub fn padded_size(&self, key: NodeKey) -> usize {
        if self.is_text(key) {
            self.size(key)
        } else {
            self.size(key) + 2
        }
    }

    /// All children of `key`, tombstones included.
    pub fn all_children(&self, key: NodeKey) -> &[NodeKey] {
        self.get(key).children()
    }

    /// The live children of `key`.
    pub fn children(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.all_children(key)
            .iter()
            .copied()
            .filter(|child| !self.is_removed(*child))
    }

    pub fn has_text_child(&self, key: NodeKey) -> bool {
        self.children(key).any(|child| self.is_text(child))
    }

    /// The physical position of `child` among all children of `parent`.
    pub fn child_index(&self, parent: NodeKey, child: NodeKey) -> Option<usize> {
        self.all_children(parent).iter().position(|c| *c == child)
    }

    /// The offset of `child` among the live children of `parent`.
    ///
    /// For a tombstoned child this is the number of live children before it, that is, the offset
    /// the child would have if it were alive.
    pub fn find_offset(&self, parent: NodeKey, child: NodeKey) -> usize {
        self.all_children(parent)
            .iter()
            .take_while(|c| **c != child)
            .filter(|c| !self.is_removed(**c))
            .count()
    }

    /// The index-space size of the live children of `parent` that precede `child`.
    fn left_siblings_size(&self, parent: NodeKey, child: NodeKey) -> usize {
        self.all_children(parent)
            .iter()
            .take_while(|c| **c != child)
            .filter(|c| !self.is_removed(**c))
            .map(|c| self.padded_size(*c))
            .sum()
    }

    /// Adds `delta` to the size of `start` and of every ancestor up to the first tombstone, which
    /// does not contribute to its own parent.
    fn propagate(&mut self, start: NodeKey, delta: isize) {
        if delta == 0 {
            return;
        }
        let mut node = start;
        loop {
            let slot = self.slot_mut(node);
            slot.size = slot.size.saturating_add_signed(delta);
            if slot.node.is_removed() {
                break;
            }
            match slot.parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
    }

    fn live_padded_size(&self, key: NodeKey) -> isize {
        if self.is_removed(key) {
            0
        } else {
            self.padded_size(key) as isize
        }
    }

    /// Adds a detached node to the arena.
    ///
    /// Elements must be passed without children; they are linked with [`IndexTree::insert_at`].
    pub fn alloc(&mut self, node: N) -> NodeKey {
        debug_assert!(node.children().is_empty(), "children are linked through insert_at");
        let key = NodeKey(u32::try_from(self.slots.len()).expect("arena fits u32 keys"));
        self.slots.push(Some(Slot {
            node,
            parent: None,
            size: 0,
        }));
        self.len += 1;
        key
    }

    /// Links the detached `child` as the `index`-th (physical) child of `parent`.
    pub fn insert_at(&mut self, parent: NodeKey, index: usize, child: NodeKey) {
        debug_assert!(self.parent(child).is_none(), "{child:?} is still linked");
        self.slot_mut(child).parent = Some(parent);
        let children = self
            .get_mut(parent)
            .children_mut()
            .expect("text nodes cannot have children");
        children.insert(index, child);
        let delta = self.live_padded_size(child);
        self.propagate(parent, delta);
    }

    /// Links the detached `child` right after `prev` among the children of `parent`, or first if
    /// `prev` is `None`.
    pub fn insert_after(&mut self, parent: NodeKey, prev: Option<NodeKey>, child: NodeKey) {
        let index = prev
            .and_then(|prev| self.child_index(parent, prev))
            .map_or(0, |index| index + 1);
        self.insert_at(parent, index, child);
    }

    /// Links the detached `child` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeKey, child: NodeKey) {
        let index = self.all_children(parent).len();
        self.insert_at(parent, index, child);
    }

    /// Unlinks `child` from its parent, leaving it (and its subtree) detached in the arena.
    pub fn detach(&mut self, child: NodeKey) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        let delta = self.live_padded_size(child);
        if let Some(children) = self.get_mut(parent).children_mut() {
            children.retain(|c| *c != child);
        }
        self.slot_mut(child).parent = None;
        self.propagate(parent, -delta);
    }

    /// Moves `child` to become the `index`-th child of `new_parent`.
    pub fn move_to(&mut self, child: NodeKey, new_parent: NodeKey, index: usize) {
        self.detach(child);
        self.insert_at(new_parent, index, child);
    }

    /// Tombstones a node through `mark` and updates the sizes of its ancestors if it was alive.
    pub fn remove_node(&mut self, key: NodeKey, mark: impl FnOnce(&mut N)) {
        let was_alive = !self.is_removed(key);
        let padded = self.padded_size(key) as isize;
        mark(self.get_mut(key));
        debug_assert!(self.is_removed(key), "mark must tombstone the node");
        if was_alive {
            if let Some(parent) = self.parent(key) {
                self.propagate(parent, -padded);
            }
        }
    }

    /// Changes the value of a text node through `update` and updates the sizes of its ancestors.
    pub fn resize_text(&mut self, key: NodeKey, update: impl FnOnce(&mut N)) {
        debug_assert!(self.is_text(key));
        let before = self.live_padded_size(key);
        update(self.get_mut(key));
        let after = self.live_padded_size(key);
        if let Some(parent) = self.parent(key) {
            self.propagate(parent, after - before);
        }
    }

    /// Detaches `key` and drops it and its whole subtree from the arena.
    ///
    /// Returns the number of nodes that were dropped.
    pub fn free(&mut self, key: NodeKey) -> usize {
        self.detach(key);
        let doomed = self.descendants(key);
        for node in &doomed {
            self.slots[node.slot()] = None;
        }
        self.len -= doomed.len();
        doomed.len()
    }

    /// `key` and all nodes below it, tombstones included, in pre-order.
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.all_children(node).iter().rev().copied());
        }
        out
    }

    /// Finds the [`TreePos`] of `index`.
    ///
    /// Text boundaries and element boundaries can share an index: with `prefer_text` such an
    /// index resolves into the adjoining text node, otherwise it stays at the element boundary.
    pub fn find_tree_pos(&self, index: usize, prefer_text: bool) -> Result<TreePos, TreeError> {
        self.find_tree_pos_in(self.root, index, prefer_text)
    }

    fn find_tree_pos_in(
        &self,
        node: NodeKey,
        index: usize,
        prefer_text: bool,
    ) -> Result<TreePos, TreeError> {
        let size = self.size(node);
        if index > size {
            return Err(TreeError::IndexOutOfRange { index, size });
        }
        if self.is_text(node) {
            return Ok(TreePos {
                node,
                offset: index,
            });
        }

        // `offset` counts the live children passed so far, `pos` the index space they cover.
        let mut offset = 0;
        let mut pos = 0;
        for child in self.children(node) {
            let padded = self.padded_size(child);
            let rest = index - pos;
            if prefer_text && self.is_text(child) && padded >= rest {
                return self.find_tree_pos_in(child, rest, prefer_text);
            }
            if rest == 0 {
                return Ok(TreePos { node, offset });
            }
            if !prefer_text && padded == rest {
                return Ok(TreePos {
                    node,
                    offset: offset + 1,
                });
            }
            if padded > rest {
                // inside an element we skip its open tag
                let inner = if self.is_text(child) { rest } else { rest - 1 };
                return self.find_tree_pos_in(child, inner, prefer_text);
            }
            pos += padded;
            offset += 1;
        }
        Ok(TreePos { node, offset })
    }

    /// The index of a [`TreePos`]; the inverse of [`IndexTree::find_tree_pos`].
    pub fn index_of(&self, pos: TreePos) -> usize {
        let mut node = pos.node;
        let mut index = 0;
        if self.is_text(node) {
            index += pos.offset;
            if let Some(parent) = self.parent(node) {
                index += self.left_siblings_size(parent, node);
                node = parent;
            }
        } else {
            index += self
                .children(node)
                .take(pos.offset)
                .map(|child| self.padded_size(child))
                .sum::<usize>();
        }
        // one open tag per ancestor below the root
        while let Some(parent) = self.parent(node) {
            index += self.left_siblings_size(parent, node) + 1;
            node = parent;
        }
        index
    }

    /// Resolves a path into a [`TreePos`].
    ///
    /// Inside an element that holds text, the last path element is an offset into the element's
    /// content rather than a child offset.
    pub fn path_to_tree_pos(&self, path: &[usize]) -> Result<TreePos, TreeError> {
        let (last, steps) = path.split_last().ok_or(TreeError::EmptyPath)?;
        let invalid = || TreeError::InvalidPath(path.to_vec());

        let mut node = self.root;
        for step in steps {
            node = self.children(node).nth(*step).ok_or_else(invalid)?;
            if self.is_text(node) {
                return Err(invalid());
            }
        }

        if self.has_text_child(node) {
            if *last > self.size(node) {
                return Err(invalid());
            }
            return self.find_tree_pos_in(node, *last, true);
        }
        if *last > self.children(node).count() {
            return Err(invalid());
        }
        Ok(TreePos {
            node,
            offset: *last,
        })
    }

    /// The path of a [`TreePos`]; the inverse of [`IndexTree::path_to_tree_pos`].
    pub fn tree_pos_to_path(&self, pos: TreePos) -> Vec<usize> {
        let mut path = Vec::new();
        let mut node = pos.node;
        if self.is_text(node) {
            match self.parent(node) {
                Some(parent) => {
                    path.push(self.left_siblings_size(parent, node) + pos.offset);
                    node = parent;
                }
                None => path.push(pos.offset),
            }
        } else if self.has_text_child(node) {
            path.push(
                self.children(node)
                    .take(pos.offset)
                    .map(|child| self.padded_size(child))
                    .sum(),
            );
        } else {
            path.push(pos.offset);
        }

        while let Some(parent) = self.parent(node) {
            path.push(self.find_offset(parent, node));
            node = parent;
        }
        path.reverse();
        path
    }

    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>, TreeError> {
        Ok(self.tree_pos_to_path(self.find_tree_pos(index, true)?))
    }

    pub fn path_to_index(&self, path: &[usize]) -> Result<usize, TreeError> {
        Ok(self.index_of(self.path_to_tree_pos(path)?))
    }
}
