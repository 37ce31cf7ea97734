// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{CrdtNode, CrdtTree, MergeLink, NodeKind, TEXT_TAG, TreeNodeId};
use crate::{
    AttributeRegister, Ticket, TreeError, attributes::Attribute, create_map,
    index_tree::{IndexTree, NodeKey},
};

/// One node of a [`CrdtTree`] in the depth-first node list.
///
/// The list holds every node, tombstones included, in pre-order; `depth` is the distance from
/// the root. It carries everything needed to rebuild an identical tree on another replica.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct NodeRecord {
    pub id: TreeNodeId,
    /// The element tag, or [`TEXT_TAG`] for text.
    pub tag: String,
    pub depth: usize,
    /// The value of a text node.
    pub value: Option<String>,
    /// Attributes ordered by key, tombstones included.
    pub attributes: Vec<(String, Attribute)>,
    pub ins_prev: Option<TreeNodeId>,
    pub ins_next: Option<TreeNodeId>,
    pub removed_at: Option<Ticket>,
    pub merged_from: Option<MergeLink>,
    pub merged_into: Option<MergeLink>,
}

impl NodeRecord {
    fn of(node: &CrdtNode, depth: usize) -> Self {
        let (tag, value) = match &node.kind {
            NodeKind::Element { tag, .. } => (tag.clone(), None),
            NodeKind::Text { value } => (TEXT_TAG.to_string(), Some(value.clone())),
        };
        Self {
            id: node.id,
            tag,
            depth,
            value,
            attributes: node
                .attributes
                .sorted()
                .into_iter()
                .map(|(key, attribute)| (key.clone(), attribute.clone()))
                .collect(),
            ins_prev: node.ins_prev,
            ins_next: node.ins_next,
            removed_at: node.removed_at,
            merged_from: node.merged_from,
            merged_into: node.merged_into,
        }
    }

    fn to_node(&self) -> CrdtNode {
        let mut node = match &self.value {
            Some(value) => CrdtNode::text(self.id, value.clone()),
            None => {
                let mut attributes = AttributeRegister::new();
                for (key, attribute) in &self.attributes {
                    attributes.restore(key.clone(), attribute.clone());
                }
                CrdtNode::element(self.id, self.tag.clone(), attributes)
            }
        };
        node.ins_prev = self.ins_prev;
        node.ins_next = self.ins_next;
        node.removed_at = self.removed_at;
        node.merged_from = self.merged_from;
        node.merged_into = self.merged_into;
        node
    }
}

impl CrdtTree {
    /// Every node of the tree, tombstones included, in pre-order.
    pub fn to_node_records(&self) -> Vec<NodeRecord> {
        let mut records = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.nodes.root(), 0)];
        while let Some((key, depth)) = stack.pop() {
            records.push(NodeRecord::of(self.node(key), depth));
            stack.extend(
                self.nodes
                    .all_children(key)
                    .iter()
                    .rev()
                    .map(|child| (*child, depth + 1)),
            );
        }
        records
    }

    /// Rebuilds a tree from the output of [`CrdtTree::to_node_records`].
    pub fn from_node_records(records: &[NodeRecord]) -> Result<Self, TreeError> {
        let Some((root, rest)) = records.split_first() else {
            return Err(TreeError::MalformedTree("no root record"));
        };
        if root.depth != 0 || root.value.is_some() {
            return Err(TreeError::MalformedTree("the root must be an element at depth 0"));
        }

        let mut tree = Self {
            nodes: IndexTree::new(root.to_node()),
            by_id: create_map(),
        };
        let root_key = tree.nodes.root();
        tree.register(root_key);

        // the open elements on the way from the root to the previous record
        let mut path: Vec<NodeKey> = vec![root_key];
        for record in rest {
            if record.depth == 0 || record.depth > path.len() {
                return Err(TreeError::MalformedTree("node depths skip a level"));
            }
            path.truncate(record.depth);
            let Some(parent) = path.last().copied() else {
                return Err(TreeError::MalformedTree("node depths skip a level"));
            };
            if tree.nodes.is_text(parent) {
                return Err(TreeError::MalformedTree("text cannot have children"));
            }
            let key = tree.nodes.alloc(record.to_node());
            tree.register(key);
            tree.nodes.append(parent, key);
            path.push(key);
        }

        tracing::trace!(nodes = records.len(), "rebuilt tree from node records");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActorId, TicketSequence, tree::TreeContent, tree::tests::tree_from, tree_node};

    fn edited() -> CrdtTree {
        let mut tree = tree_from(tree_node!(root [p { a: "1" } ["abcd"], ul [li ["e"]]]));
        let edited_at = Ticket::new(2, 1, ActorId::new(1));
        let (from, to) = tree.index_range_to_pos_range((2, 4)).unwrap();
        tree.edit(
            (&from, &to),
            vec![],
            1,
            edited_at,
            None,
            &mut TicketSequence::after(edited_at),
        )
        .unwrap();
        let (from, to) = tree.index_range_to_pos_range((0, 1)).unwrap();
        tree.remove_style(
            (&from, &to),
            &["a".to_string()],
            Ticket::new(3, 0, ActorId::new(1)),
            None,
        )
        .unwrap();
        tree
    }

    #[test]
    fn records_rebuild_an_identical_tree() {
        let tree = edited();
        let records = tree.to_node_records();
        assert_eq!(records.len(), tree.node_count());
        assert_eq!(records[0].depth, 0);

        let rebuilt = CrdtTree::from_node_records(&records).unwrap();
        assert_eq!(rebuilt.to_xml(), tree.to_xml());
        assert_eq!(rebuilt.to_node_records(), records);
        assert_eq!(rebuilt.root_size(), tree.root_size());
        assert_eq!(rebuilt.data_size(), tree.data_size());
        for index in 0..=tree.root_size() {
            assert_eq!(rebuilt.find_pos(index), tree.find_pos(index));
        }
    }

    #[test]
    fn rebuilt_tree_accepts_further_edits() {
        let tree = edited();
        let mut rebuilt = CrdtTree::from_node_records(&tree.to_node_records()).unwrap();
        let mut original = tree.clone();
        let pos = tree.find_pos(2).unwrap();
        let mut issuer = TicketSequence::after(Ticket::new(4, 0, ActorId::new(2)));
        let content = TreeContent::stamp(&tree_node!("x"), &mut issuer);
        let edited_at = Ticket::new(4, 2, ActorId::new(2));
        for tree in [&mut rebuilt, &mut original] {
            tree.edit(
                (&pos, &pos),
                vec![content.clone()],
                0,
                edited_at,
                Some(&Default::default()),
                &mut TicketSequence::after(edited_at),
            )
            .unwrap();
        }
        assert_eq!(rebuilt.to_xml(), original.to_xml());
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert_eq!(
            CrdtTree::from_node_records(&[]).unwrap_err(),
            TreeError::MalformedTree("no root record")
        );

        let mut records = edited().to_node_records();
        records[1].depth = 3;
        assert_eq!(
            CrdtTree::from_node_records(&records).unwrap_err(),
            TreeError::MalformedTree("node depths skip a level")
        );

        let mut records = edited().to_node_records();
        // the text of the first paragraph gains a child
        let text = records.iter().position(|r| r.value.is_some()).unwrap();
        let mut child = records[text].clone();
        child.depth += 1;
        records.insert(text + 1, child);
        assert_eq!(
            CrdtTree::from_node_records(&records).unwrap_err(),
            TreeError::MalformedTree("text cannot have children")
        );
    }
}
