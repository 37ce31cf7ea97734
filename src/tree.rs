// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Tree CRDT
//!
//! [`CrdtTree`] layers replication on top of an [`IndexTree`]: every node has a stable
//! [`TreeNodeId`], removed nodes stay in place as tombstones, and edits are addressed by
//! [`CrdtTreePos`]itions that name existing nodes instead of integer offsets.
//!
//! A position is resolved against whatever the local tree looks like when the operation arrives,
//! which may differ from the tree of the replica that issued it. The rules that make every replica
//! end up with the same tree live in [`CrdtTree::edit`] and [`CrdtTree::style`].
use crate::{
    HashMap, Ticket, TreeError, create_map,
    index_tree::{IndexNode, IndexTree, NodeKey, TreePos},
};
use std::collections::BTreeMap;
use view::View;

mod change;
mod edit;
mod encoding;
mod gc;
mod node;
mod pos;
mod style;
mod view;

pub use change::{EditResult, GcPair, StyleResult, TreeChange, TreeChangeKind, TreeChangeValue};
pub use encoding::NodeRecord;
pub(crate) use node::{validate_contents, validate_tree_nodes};
pub use node::{
    CrdtNode, DataSize, MergeLink, NodeKind, TEXT_TAG, TreeContent, TreeNode, TreeNodeId,
};
pub use pos::CrdtTreePos;

/// A replicated tree of elements and text.
#[derive(Clone, Debug)]
pub struct CrdtTree {
    nodes: IndexTree<CrdtNode>,
    /// The fragments of every created node, by creation ticket and then by offset.
    by_id: HashMap<Ticket, BTreeMap<u32, NodeKey>>,
}

impl CrdtTree {
    /// Creates a tree from stamped content, which must be an element.
    pub fn new(root: TreeContent) -> Result<Self, TreeError> {
        validate_contents(std::slice::from_ref(&root))?;
        let TreeContent::Element {
            id,
            tag,
            attributes,
            children,
        } = root
        else {
            return Err(TreeError::MalformedTree("the root must be an element"));
        };
        let attributes = crate::AttributeRegister::from_values(&attributes, id.created_at());
        let mut tree = Self {
            nodes: IndexTree::new(CrdtNode::element(id, tag, attributes)),
            by_id: create_map(),
        };
        let root = tree.nodes.root();
        tree.register(root);
        for child in children {
            let key = tree.build(child);
            tree.nodes.append(root, key);
        }
        Ok(tree)
    }

    /// Allocates `content` as a detached subtree and registers its ids.
    fn build(&mut self, content: TreeContent) -> NodeKey {
        match content {
            TreeContent::Text { id, value } => {
                let key = self.nodes.alloc(CrdtNode::text(id, value));
                self.register(key);
                key
            }
            TreeContent::Element {
                id,
                tag,
                attributes,
                children,
            } => {
                let attributes =
                    crate::AttributeRegister::from_values(&attributes, id.created_at());
                let key = self.nodes.alloc(CrdtNode::element(id, tag, attributes));
                self.register(key);
                for child in children {
                    let child = self.build(child);
                    self.nodes.append(key, child);
                }
                key
            }
        }
    }

    fn register(&mut self, key: NodeKey) {
        let id = self.nodes.get(key).id;
        self.by_id
            .entry(id.created_at())
            .or_default()
            .insert(id.offset(), key);
    }

    fn unregister(&mut self, id: &TreeNodeId) {
        if let Some(fragments) = self.by_id.get_mut(&id.created_at()) {
            fragments.remove(&id.offset());
            if fragments.is_empty() {
                self.by_id.remove(&id.created_at());
            }
        }
    }

    /// The node with exactly this id.
    fn key_of(&self, id: &TreeNodeId) -> Option<NodeKey> {
        self.by_id.get(&id.created_at())?.get(&id.offset()).copied()
    }

    /// The fragment of `id.created_at` that contains `id.offset`.
    fn find_floor(&self, id: &TreeNodeId) -> Option<NodeKey> {
        self.by_id
            .get(&id.created_at())?
            .range(..=id.offset())
            .next_back()
            .map(|(_, key)| *key)
    }

    fn node(&self, key: NodeKey) -> &CrdtNode {
        self.nodes.get(key)
    }

    fn created_at(&self, key: NodeKey) -> Ticket {
        self.nodes.get(key).created_at()
    }

    /// The node with the given id, tombstoned or not.
    pub fn get(&self, id: &TreeNodeId) -> Option<&CrdtNode> {
        self.key_of(id).map(|key| self.node(key))
    }

    /// The underlying index tree, for read-only inspection.
    pub fn index_tree(&self) -> &IndexTree<CrdtNode> {
        &self.nodes
    }

    pub fn root(&self) -> &CrdtNode {
        self.node(self.nodes.root())
    }

    /// The size of the document in index space.
    pub fn root_size(&self) -> usize {
        self.nodes.size(self.nodes.root())
    }

    /// The number of nodes held, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.nodes
            .descendants(self.nodes.root())
            .into_iter()
            .filter(|key| self.nodes.is_removed(*key))
            .count()
    }

    /// The memory held by every node, tombstones included.
    pub fn data_size(&self) -> DataSize {
        self.nodes
            .descendants(self.nodes.root())
            .into_iter()
            .map(|key| self.node(key).data_size())
            .sum()
    }

    /// The live document as XML, with attributes ordered by key.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(self.nodes.root(), &mut out);
        out
    }

    fn write_xml(&self, key: NodeKey, out: &mut String) {
        let node = self.node(key);
        match &node.kind {
            NodeKind::Text { value } => out.push_str(value),
            NodeKind::Element { tag, .. } => {
                out.push('<');
                out.push_str(tag);
                out.push_str(&node.attributes.to_xml());
                out.push('>');
                for child in self.nodes.children(key) {
                    self.write_xml(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    /// The live document as a plain value.
    pub fn to_tree_node(&self) -> TreeNode {
        self.tree_node_of(self.nodes.root())
    }

    fn tree_node_of(&self, key: NodeKey) -> TreeNode {
        let node = self.node(key);
        match &node.kind {
            NodeKind::Text { value } => TreeNode::text(value.clone()),
            NodeKind::Element { tag, .. } => TreeNode::Element {
                tag: tag.clone(),
                attributes: node
                    .attributes
                    .values()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                children: self
                    .nodes
                    .children(key)
                    .map(|child| self.tree_node_of(child))
                    .collect(),
            },
        }
    }

    /// The position in front of `index`.
    pub fn find_pos(&self, index: usize) -> Result<CrdtTreePos, TreeError> {
        let pos = self.nodes.find_tree_pos(index, true)?;
        Ok(self.from_tree_pos(pos))
    }

    pub fn path_to_pos(&self, path: &[usize]) -> Result<CrdtTreePos, TreeError> {
        let pos = self.nodes.path_to_tree_pos(path)?;
        Ok(self.from_tree_pos(pos))
    }

    /// The current index of a position, which may have been issued by another replica.
    pub fn pos_to_index(&self, pos: &CrdtTreePos) -> Result<usize, TreeError> {
        let anchor = self.resolve(&View::local(), pos)?;
        Ok(self.nodes.index_of(self.to_tree_pos(
            anchor.parent,
            anchor.left,
            anchor.split_at.unwrap_or_default(),
        )))
    }

    pub fn pos_to_path(&self, pos: &CrdtTreePos) -> Result<Vec<usize>, TreeError> {
        let anchor = self.resolve(&View::local(), pos)?;
        Ok(self.nodes.tree_pos_to_path(self.to_tree_pos(
            anchor.parent,
            anchor.left,
            anchor.split_at.unwrap_or_default(),
        )))
    }

    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>, TreeError> {
        self.nodes.index_to_path(index)
    }

    pub fn path_to_index(&self, path: &[usize]) -> Result<usize, TreeError> {
        self.nodes.path_to_index(path)
    }

    pub fn index_range_to_pos_range(
        &self,
        (from, to): (usize, usize),
    ) -> Result<(CrdtTreePos, CrdtTreePos), TreeError> {
        if from > to {
            return Err(TreeError::InvalidRange { from, to });
        }
        Ok((self.find_pos(from)?, self.find_pos(to)?))
    }

    pub fn pos_range_to_index_range(
        &self,
        (from, to): (&CrdtTreePos, &CrdtTreePos),
    ) -> Result<(usize, usize), TreeError> {
        Ok((self.pos_to_index(from)?, self.pos_to_index(to)?))
    }

    pub fn path_range_to_pos_range(
        &self,
        (from, to): (&[usize], &[usize]),
    ) -> Result<(CrdtTreePos, CrdtTreePos), TreeError> {
        if from.len() != to.len() {
            return Err(TreeError::PathLengthMismatch {
                from: from.len(),
                to: to.len(),
            });
        }
        Ok((self.path_to_pos(from)?, self.path_to_pos(to)?))
    }

    pub fn pos_range_to_path_range(
        &self,
        (from, to): (&CrdtTreePos, &CrdtTreePos),
    ) -> Result<(Vec<usize>, Vec<usize>), TreeError> {
        Ok((self.pos_to_path(from)?, self.pos_to_path(to)?))
    }

    /// The [`TreePos`] right after `left`, or at the start of `parent` if `left` is `parent`
    /// itself. For a live text `left` this is `split_at` characters into it.
    fn to_tree_pos(&self, parent: NodeKey, left: NodeKey, split_at: usize) -> TreePos {
        let parent = if parent == left {
            parent
        } else {
            self.nodes.parent(left).unwrap_or(parent)
        };
        if self.nodes.is_removed(parent) {
            // position of the closest live ancestor
            let mut child = parent;
            let mut live = parent;
            while self.nodes.is_removed(live) {
                let Some(up) = self.nodes.parent(live) else {
                    break;
                };
                child = live;
                live = up;
            }
            return TreePos {
                node: live,
                offset: self.nodes.find_offset(live, child),
            };
        }
        if parent == left {
            return TreePos {
                node: parent,
                offset: 0,
            };
        }
        let offset = self.nodes.find_offset(parent, left);
        if self.nodes.is_removed(left) {
            TreePos {
                node: parent,
                offset,
            }
        } else if self.node(left).is_text() {
            TreePos {
                node: left,
                offset: split_at,
            }
        } else {
            TreePos {
                node: parent,
                offset: offset + 1,
            }
        }
    }

    fn to_index(&self, parent: NodeKey, left: NodeKey) -> usize {
        let split_at = self.nodes.size(left);
        self.nodes
            .index_of(self.to_tree_pos(parent, left, split_at))
    }

    fn to_path(&self, parent: NodeKey, left: NodeKey) -> Vec<usize> {
        let split_at = self.nodes.size(left);
        self.nodes
            .tree_pos_to_path(self.to_tree_pos(parent, left, split_at))
    }
}
