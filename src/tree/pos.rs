// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{CrdtTree, TreeNodeId, view::View};
use crate::{
    TreeError,
    index_tree::{IndexNode, NodeKey, TreePos},
};

/// A location in a [`CrdtTree`] expressed through node identities.
///
/// The location is right after `left_sibling_id` inside `parent_id`. When the location is the
/// start of the parent, `left_sibling_id` is the parent itself. For text, the left sibling's
/// offset points into the text: `(created_at, 3)` is after the third character of the text
/// inserted at `created_at`, whichever fragment that character ended up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct CrdtTreePos {
    parent_id: TreeNodeId,
    left_sibling_id: TreeNodeId,
}

impl CrdtTreePos {
    pub const fn new(parent_id: TreeNodeId, left_sibling_id: TreeNodeId) -> Self {
        Self {
            parent_id,
            left_sibling_id,
        }
    }

    pub fn parent_id(&self) -> TreeNodeId {
        self.parent_id
    }

    pub fn left_sibling_id(&self) -> TreeNodeId {
        self.left_sibling_id
    }
}

/// A [`CrdtTreePos`] resolved against the local tree.
#[derive(Clone, Copy, Debug)]
pub(super) struct Anchor {
    pub(super) parent: NodeKey,
    /// `parent` itself when the position is the start of `parent`.
    pub(super) left: NodeKey,
    /// For a text `left`, the number of its characters that lie before the position.
    pub(super) split_at: Option<usize>,
}

impl CrdtTree {
    /// Names the location `pos` through the nodes around it.
    pub(super) fn from_tree_pos(&self, pos: TreePos) -> CrdtTreePos {
        let TreePos { node, offset } = pos;
        if self.node(node).is_text() {
            let Some(parent) = self.nodes.parent(node) else {
                return CrdtTreePos::new(self.node(node).id, self.node(node).id);
            };
            let parent_id = self.node(parent).id;
            if offset > 0 {
                let id = self.node(node).id;
                let left = TreeNodeId::new(id.created_at(), id.offset() + offset as u32);
                return CrdtTreePos::new(parent_id, left);
            }
            // the start of a text node is the end of whatever precedes it
            let previous = self
                .nodes
                .children(parent)
                .take_while(|child| *child != node)
                .last();
            let left = match previous {
                Some(previous) => self.end_of(previous),
                None => parent_id,
            };
            return CrdtTreePos::new(parent_id, left);
        }

        let parent_id = self.node(node).id;
        let left = match offset.checked_sub(1) {
            None => parent_id,
            Some(index) => match self.nodes.children(node).nth(index) {
                Some(child) => self.end_of(child),
                None => parent_id,
            },
        };
        CrdtTreePos::new(parent_id, left)
    }

    /// The id naming the location right after `key`.
    fn end_of(&self, key: NodeKey) -> TreeNodeId {
        let node = self.node(key);
        if node.is_text() {
            TreeNodeId::new(
                node.id.created_at(),
                node.id.offset() + node.text_len() as u32,
            )
        } else {
            node.id
        }
    }

    /// Finds the nodes a position refers to, as seen through `view`.
    ///
    /// This never mutates the tree; a position that points into a text node is reported through
    /// [`Anchor::split_at`].
    pub(super) fn resolve(&self, view: &View<'_>, pos: &CrdtTreePos) -> Result<Anchor, TreeError> {
        let parent_id = pos.parent_id;
        let left_id = pos.left_sibling_id;
        let parent = self
            .find_floor(&parent_id)
            .ok_or(TreeError::NodeNotFound(parent_id))?;
        let mut left = self
            .find_floor(&left_id)
            .ok_or(TreeError::NodeNotFound(left_id))?;

        // the end of a fragment is named by the start of the fragment split off from it
        let fragment = self.node(left);
        if left_id.offset() > 0 && left_id.offset() == fragment.id.offset() {
            if let Some(prev) = fragment.ins_prev {
                left = self.find_floor(&prev).ok_or(TreeError::NodeNotFound(prev))?;
            }
        }

        let fragment = self.node(left);
        let split_at = if fragment.is_text() {
            let split_at = left_id.offset().saturating_sub(fragment.id.offset()) as usize;
            if split_at > fragment.text_len() {
                return Err(TreeError::NodeNotFound(left_id));
            }
            Some(split_at)
        } else {
            None
        };

        let parent = if left == parent {
            parent
        } else {
            view.parent(self, left).unwrap_or(parent)
        };
        Ok(Anchor {
            parent,
            left,
            split_at,
        })
    }

    /// Resolves `pos` to the gap an operation acts on.
    ///
    /// A position strictly inside a text node keeps its [`Anchor::split_at`]. Any other position
    /// is moved past the fragments split off from an element without the issuer knowing, and
    /// past concurrent insertions.
    pub(super) fn anchor(&self, view: &View<'_>, pos: &CrdtTreePos) -> Result<Anchor, TreeError> {
        let Anchor {
            mut parent,
            mut left,
            split_at,
        } = self.resolve(view, pos)?;
        if let Some(split_at) = split_at {
            if split_at > 0 && split_at < self.node(left).text_len() {
                return Ok(Anchor {
                    parent: view.parent(self, left).unwrap_or(parent),
                    left,
                    split_at: Some(split_at),
                });
            }
        }
        if left != parent && !self.nodes.is_text(left) {
            left = view.lineage_end(self, left);
            parent = view.parent(self, left).unwrap_or(parent);
        }
        let (parent, left) = self.skip_concurrent(view, parent, left);
        Ok(Anchor {
            parent,
            left,
            split_at: None,
        })
    }

    /// Moves `left` forward over siblings created after the operation.
    ///
    /// Those were inserted by operations this one did not know about, and the greater ticket goes
    /// first. When the end of `parent` is reached and `parent` was split by such an operation, the
    /// walk continues at the start of the split-off element.
    fn skip_concurrent(
        &self,
        view: &View<'_>,
        mut parent: NodeKey,
        mut left: NodeKey,
    ) -> (NodeKey, NodeKey) {
        let edited_at = view.edited_at();
        let mut start = view.after(self, parent, left);
        loop {
            let children = view.children(self, parent);
            for next in children.get(start..).unwrap_or_default() {
                if !self.created_at(*next).after(&edited_at) {
                    return (parent, left);
                }
                left = *next;
            }
            let split = self.node(parent).ins_next.and_then(|id| self.key_of(&id));
            match split {
                Some(split) if self.created_at(split).after(&edited_at) => {
                    parent = split;
                    left = split;
                    start = 0;
                }
                _ => return (parent, left),
            }
        }
    }

    /// Orders anchors by document position in `view`.
    pub(super) fn gap_key(&self, view: &View<'_>, anchor: &Anchor) -> Vec<usize> {
        if let Some(split_at) = anchor.split_at {
            let mut key = view.path(self, anchor.left);
            key.push(split_at);
            return key;
        }
        let mut key = view.path(self, anchor.parent);
        key.push(view.after(self, anchor.parent, anchor.left));
        key
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ActorId, Ticket, TicketSequence,
        tree::{CrdtTree, TreeContent},
        tree_node,
    };

    fn tree() -> CrdtTree {
        let start = Ticket::new(1, 0, ActorId::new(1));
        let node = tree_node!(root [p ["abc"], p []]);
        CrdtTree::new(TreeContent::stamp(&node, &mut TicketSequence::after(start))).unwrap()
    }

    #[test]
    fn positions_inside_text_point_at_characters() {
        let tree = tree();
        let text = tree.find_pos(3).unwrap();
        assert_eq!(text.left_sibling_id().offset(), 2);
        assert_eq!(text.parent_id().created_at().delimiter(), 2);
    }

    #[test]
    fn start_of_parent_names_the_parent() {
        let tree = tree();
        let start = tree.find_pos(1).unwrap();
        assert_eq!(start.parent_id(), start.left_sibling_id());
        let empty = tree.find_pos(6).unwrap();
        assert_eq!(empty.parent_id(), empty.left_sibling_id());
    }

    #[test]
    fn end_of_text_names_its_last_character() {
        let tree = tree();
        let end = tree.find_pos(4).unwrap();
        assert_eq!(end.left_sibling_id().offset(), 3);
        assert_eq!(tree.pos_to_index(&end), Ok(4));
    }

    #[test]
    fn after_an_element_names_the_element() {
        let tree = tree();
        let between = tree.find_pos(5).unwrap();
        assert_eq!(between.parent_id(), tree.root().id());
        assert_eq!(between.left_sibling_id().created_at().delimiter(), 2);
    }
}
