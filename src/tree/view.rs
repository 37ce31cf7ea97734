// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The tree as the issuer of an operation saw it.
//!
//! A merge moves the children of a removed element into another element. An operation that did
//! not know about the merge still addresses those children inside the removed element, so a
//! [`View`] puts them back there: a moved node whose merge is unknown to the operation counts as
//! the last child of the element it came from. Everything else reads the physical tree.
use super::CrdtTree;
use crate::{
    HashMap, MaxCreatedAtMap, Ticket, causal_context::removal_threshold, create_map,
    index_tree::NodeKey,
};

/// One step of the token stream of a [`View`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ViewToken {
    Start(NodeKey),
    End(NodeKey),
    Text(NodeKey),
}

impl ViewToken {
    pub(super) fn node(self) -> NodeKey {
        match self {
            ViewToken::Start(key) | ViewToken::End(key) | ViewToken::Text(key) => key,
        }
    }
}

/// A gap between two children: `(parent, index)` in view order.
type Gap = (NodeKey, usize);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Walk {
    Before,
    Inside,
    Done,
}

/// How one operation sees the tree.
///
/// Only the placement of moved nodes is captured when the view is built; everything else is
/// read from the tree on each call. Rebuild the view after moving nodes.
#[derive(Debug)]
pub(super) struct View<'a> {
    map: Option<&'a MaxCreatedAtMap>,
    edited_at: Ticket,
    /// Per removed element, the nodes moved out of it by merges the issuer did not know about.
    moved: HashMap<NodeKey, Vec<NodeKey>>,
}

impl<'a> View<'a> {
    /// The view of an operation stamped `edited_at` that carries `map`, or of a local one.
    pub(super) fn new(
        tree: &CrdtTree,
        map: Option<&'a MaxCreatedAtMap>,
        edited_at: Ticket,
    ) -> Self {
        let mut view = Self {
            map,
            edited_at,
            moved: create_map(),
        };
        if map.is_none() {
            return view;
        }
        for key in tree.nodes.descendants(tree.nodes.root()) {
            if let Some(source) = view.merge_source(tree, key) {
                view.moved.entry(source).or_default().push(key);
            }
        }
        view
    }

    /// The view of a local operation, which has seen everything.
    pub(super) fn local() -> Self {
        Self {
            map: None,
            edited_at: Ticket::MAX,
            moved: create_map(),
        }
    }

    /// Whether the issuer had seen the effects of the operation stamped `ticket`.
    pub(super) fn seen(&self, ticket: Ticket) -> bool {
        ticket == self.edited_at
            || !ticket.after(&removal_threshold(self.map, ticket.actor()))
    }

    /// Whether the issuer knew the node.
    pub(super) fn known(&self, tree: &CrdtTree, key: NodeKey) -> bool {
        self.seen(tree.created_at(key))
    }

    /// The element `key` was moved out of by a merge the issuer did not know about.
    fn merge_source(&self, tree: &CrdtTree, key: NodeKey) -> Option<NodeKey> {
        let link = tree.node(key).merged_from?;
        if self.seen(link.at) {
            return None;
        }
        tree.key_of(&link.id)
    }

    /// Whether `key` was moved by a merge the issuer did not know about.
    pub(super) fn unknown(&self, tree: &CrdtTree, key: NodeKey) -> bool {
        self.merge_source(tree, key).is_some()
    }

    pub(super) fn edited_at(&self) -> Ticket {
        self.edited_at
    }

    /// The same operation's view of the tree as it is now.
    pub(super) fn rebuild(&self, tree: &CrdtTree) -> Self {
        Self::new(tree, self.map, self.edited_at)
    }

    /// The children of `key`, tombstones included.
    pub(super) fn children(&self, tree: &CrdtTree, key: NodeKey) -> Vec<NodeKey> {
        let mut children: Vec<NodeKey> = tree
            .nodes
            .all_children(key)
            .iter()
            .copied()
            .filter(|child| !self.unknown(tree, *child))
            .collect();
        if let Some(moved) = self.moved.get(&key) {
            children.extend_from_slice(moved);
        }
        children
    }

    pub(super) fn parent(&self, tree: &CrdtTree, key: NodeKey) -> Option<NodeKey> {
        self.merge_source(tree, key).or_else(|| tree.nodes.parent(key))
    }

    fn index(&self, tree: &CrdtTree, parent: NodeKey, child: NodeKey) -> Option<usize> {
        self.children(tree, parent).iter().position(|c| *c == child)
    }

    /// The gap right after `left` inside `parent`, or the start of `parent` if `left` is
    /// `parent` itself.
    pub(super) fn after(&self, tree: &CrdtTree, parent: NodeKey, left: NodeKey) -> usize {
        if left == parent {
            return 0;
        }
        self.index(tree, parent, left).map_or(0, |index| index + 1)
    }

    /// The child indices from the root down to `key`.
    pub(super) fn path(&self, tree: &CrdtTree, mut key: NodeKey) -> Vec<usize> {
        let mut path = Vec::new();
        while let Some(parent) = self.parent(tree, key) {
            path.push(self.index(tree, parent, key).unwrap_or_default());
            key = parent;
        }
        path.reverse();
        path
    }

    /// The last fragment of the lineage of `key` that was split off without the issuer knowing.
    pub(super) fn lineage_end(&self, tree: &CrdtTree, mut key: NodeKey) -> NodeKey {
        while let Some(next) = tree.node(key).ins_next.and_then(|id| tree.key_of(&id)) {
            if self.known(tree, next) {
                break;
            }
            key = next;
        }
        key
    }

    /// The tokens between the gap after `from` and the gap after `to`, tombstones included.
    ///
    /// Both are `(parent, left)` pairs in the sense of [`View::after`].
    pub(super) fn tokens(
        &self,
        tree: &CrdtTree,
        from: (NodeKey, NodeKey),
        to: (NodeKey, NodeKey),
    ) -> Vec<ViewToken> {
        let start = (from.0, self.after(tree, from.0, from.1));
        let stop = (to.0, self.after(tree, to.0, to.1));
        let mut walk = Walk::Before;
        let mut out = Vec::new();
        self.walk_tokens(tree, tree.nodes.root(), (start, stop), &mut walk, &mut out);
        out
    }

    fn walk_tokens(
        &self,
        tree: &CrdtTree,
        key: NodeKey,
        bounds: (Gap, Gap),
        walk: &mut Walk,
        out: &mut Vec<ViewToken>,
    ) {
        let children = self.children(tree, key);
        for (index, child) in children.iter().copied().enumerate() {
            Self::visit_gap((key, index), bounds, walk);
            if *walk == Walk::Done {
                return;
            }
            if tree.nodes.is_text(child) {
                Self::emit(ViewToken::Text(child), walk, out);
            } else {
                Self::emit(ViewToken::Start(child), walk, out);
                self.walk_tokens(tree, child, bounds, walk, out);
                if *walk == Walk::Done {
                    return;
                }
                Self::emit(ViewToken::End(child), walk, out);
            }
        }
        Self::visit_gap((key, children.len()), bounds, walk);
    }

    fn visit_gap(gap: Gap, (start, stop): (Gap, Gap), walk: &mut Walk) {
        if gap == stop {
            *walk = Walk::Done;
        } else if gap == start && *walk == Walk::Before {
            *walk = Walk::Inside;
        }
    }

    fn emit(token: ViewToken, walk: &Walk, out: &mut Vec<ViewToken>) {
        if *walk == Walk::Inside {
            out.push(token);
        }
    }
}
