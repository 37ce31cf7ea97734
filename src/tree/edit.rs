// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{
    CrdtNode, CrdtTree, CrdtTreePos, DataSize, EditResult, GcPair, MergeLink, NodeKind,
    TreeChange, TreeChangeKind, TreeChangeValue, TreeContent, TreeNode, TreeNodeId,
    pos::Anchor,
    validate_contents,
    view::{View, ViewToken},
};
use crate::{
    HashMap, HashSet, MaxCreatedAtMap, Ticket, TicketIssuer, TreeError,
    causal_context::record_created_at,
    create_set,
    index_tree::{IndexNode, NodeKey, TreePos},
};
use std::mem;

/// The map an edit ships with its operation.
///
/// A local edit records every node it looked at, so that replaying it elsewhere sees the same
/// nodes, merges and splits. A remote edit only records the nodes it removed.
struct Notes {
    local: bool,
    map: MaxCreatedAtMap,
}

impl Notes {
    fn new(local: bool) -> Self {
        Self {
            local,
            map: MaxCreatedAtMap::new(),
        }
    }

    fn record(&mut self, ticket: Ticket) {
        record_created_at(&mut self.map, ticket);
    }

    /// Records what a local issuer saw of `key`.
    fn note(&mut self, tree: &CrdtTree, key: NodeKey) {
        if !self.local {
            return;
        }
        let node = tree.node(key);
        self.record(node.created_at());
        for link in [node.merged_from, node.merged_into].into_iter().flatten() {
            self.record(link.at);
        }
        if !node.is_text() {
            if let Some(next) = node.ins_next {
                self.record(next.created_at());
            }
        }
    }
}

impl CrdtTree {
    /// Replaces the range `from..to` with `contents`, and splits the element at `from`
    /// `split_level` levels up.
    ///
    /// This is both the local and the remote entry point:
    ///
    /// - A local edit passes `None` for `max_created_at_map` and may remove every node it can see.
    ///   The map of the nodes it looked at is returned in [`EditResult::max_created_at_map`] and
    ///   must be shipped with the operation.
    /// - A remote edit passes the issuer's map. Nodes that are newer than the map's entry for their
    ///   creator were inserted concurrently and survive, unless their parent is removed as a
    ///   whole. Merges and splits newer than the map are undone in the issuer's view of the tree,
    ///   so positions land where the issuer meant them.
    ///
    /// Within the range, text and elements that lie entirely inside are removed. An element whose
    /// start tag is inside the range but whose end tag is not is removed as well, and its remaining
    /// children are moved into the element at `from`, right after the merge point (a merge). The
    /// removed element keeps a link to where its children went, and every moved child a link back.
    ///
    /// Element clones created by splitting are stamped with tickets from `issuer`, which must
    /// hand out the tickets that follow `edited_at`, so that every replica assigns the same ids.
    /// Split elements stop at the root, which is never split.
    ///
    /// Contents, positions and the order of a local range are validated before anything changes.
    /// A remote range that concurrent merges turned around collapses to its start.
    pub fn edit(
        &mut self,
        (from, to): (&CrdtTreePos, &CrdtTreePos),
        contents: Vec<TreeContent>,
        split_level: u32,
        edited_at: Ticket,
        max_created_at_map: Option<&MaxCreatedAtMap>,
        issuer: &mut impl TicketIssuer,
    ) -> Result<EditResult, TreeError> {
        validate_contents(&contents)?;
        let mut view = View::new(self, max_created_at_map, edited_at);
        let mut notes = Notes::new(max_created_at_map.is_none());
        for id in [
            from.parent_id(),
            from.left_sibling_id(),
            to.parent_id(),
            to.left_sibling_id(),
        ] {
            let mut key = self.find_floor(&id);
            while let Some(node) = key {
                notes.note(self, node);
                key = self.nodes.parent(node);
            }
        }

        let from_anchor = self.anchor(&view, from)?;
        let to_anchor = self.anchor(&view, to)?;
        let collapsed =
            self.gap_key(&view, &from_anchor) > self.gap_key(&view, &to_anchor);
        if collapsed && notes.local {
            return Err(TreeError::InvalidRange {
                from: self.anchor_index(&from_anchor),
                to: self.anchor_index(&to_anchor),
            });
        }

        let mut result = EditResult::default();
        let (from_parent, from_left) =
            self.settle(&from_anchor, &mut view, &mut result.data_size_delta);
        let (to_parent, to_left) = if collapsed {
            tracing::debug!(?from, ?to, "range reordered by concurrent merges, collapsing");
            (from_parent, from_left)
        } else {
            let to_anchor = self.anchor(&view, to)?;
            self.settle(&to_anchor, &mut view, &mut result.data_size_delta)
        };
        let from_index = self.to_index(from_parent, from_left);
        let from_path = self.to_path(from_parent, from_left);

        let tokens = view.tokens(self, (from_parent, from_left), (to_parent, to_left));
        let mut ends = create_set();
        let mut starts = Vec::new();
        for token in &tokens {
            match token {
                ViewToken::Start(key) => starts.push(*key),
                ViewToken::End(key) => {
                    ends.insert(*key);
                }
                ViewToken::Text(_) => {}
            }
        }
        // elements whose every fragment ends inside the range
        let whole: HashSet<NodeKey> = starts
            .iter()
            .copied()
            .filter(|key| ends.contains(&view.lineage_end(self, *key)))
            .collect();

        let mut removing = Vec::new();
        let mut removing_set = create_set();
        for token in &tokens {
            let key = token.node();
            notes.note(self, key);
            // an end tag alone keeps its element
            if matches!(token, ViewToken::End(_)) {
                continue;
            }
            let in_removed_whole = view
                .parent(self, key)
                .is_some_and(|parent| removing_set.contains(&parent) && whole.contains(&parent));
            if !view.known(self, key) && !in_removed_whole {
                continue;
            }
            notes.record(self.created_at(key));
            removing.push(key);
            removing_set.insert(key);
        }
        result.changes = self.deletion_changes(&tokens, &removing_set, &view, edited_at)?;

        for key in &removing {
            self.tombstone(*key, edited_at, &mut result);
        }

        let removed_starts: Vec<NodeKey> = starts
            .iter()
            .copied()
            .filter(|key| removing_set.contains(key))
            .collect();
        // (fragment, first fragment) of every removed element that still has content to merge
        let mut sources: Vec<(NodeKey, NodeKey)> = Vec::new();
        for &start in &removed_starts {
            let lineage = self.lineage_from(start, |tree, fragment| !view.known(tree, fragment));
            for fragment in &lineage[1..] {
                self.tombstone(*fragment, edited_at, &mut result);
            }
            if whole.contains(&start) {
                for fragment in &lineage[1..] {
                    self.remove_subtree(*fragment, edited_at, &mut result);
                }
            } else {
                sources.extend(lineage.iter().map(|fragment| (*fragment, start)));
            }
        }
        if !sources.is_empty() {
            self.merge(&view, from_parent, &sources, &mut notes, &mut result);
        }

        // content left behind in removed elements is removed with them
        let emptied: Vec<NodeKey> = removed_starts
            .iter()
            .chain(sources.iter().map(|(source, _)| source))
            .copied()
            .collect();
        for key in emptied {
            let Some(removed_at) = self.node(key).removed_at else {
                continue;
            };
            for child in self.nodes.all_children(key).to_vec() {
                if whole.contains(&key) && !view.unknown(self, child) {
                    continue;
                }
                self.remove_subtree(child, removed_at, &mut result);
            }
        }

        if split_level > 0 {
            view = view.rebuild(self);
            let mut parent = from_parent;
            let mut left = from_left;
            for _ in 0..split_level {
                for child in self.nodes.all_children(parent) {
                    notes.note(self, *child);
                }
                let Some(grand_parent) = view.parent(self, parent) else {
                    break;
                };
                let tail = self.split_tail(&view, parent, left);
                result.data_size_delta += self.split_element(parent, &tail, issuer);
                left = parent;
                parent = grand_parent;
            }
            result.changes.push(TreeChange {
                kind: TreeChangeKind::Content,
                from: from_index,
                to: from_index,
                from_path: from_path.clone(),
                to_path: from_path.clone(),
                actor: edited_at.actor(),
                value: None,
                split_level,
            });
        }

        let inserted = contents.len();
        if !contents.is_empty() {
            let values: Vec<TreeNode> = contents.iter().map(TreeContent::to_tree_node).collect();
            let mut left = from_left;
            let mut first = None;
            for content in contents {
                let key = self.build(content);
                result.data_size_delta += self.subtree_data_size(key);
                self.insert_at_gap(&view, from_parent, left, key, &mut result);
                first.get_or_insert(key);
                left = key;
                view = view.rebuild(self);
            }

            // content inserted into a concurrently removed element is born removed
            let visible = first.is_some_and(|key| self.is_live(key));
            let value = visible.then_some(TreeChangeValue::Content(values));
            match result.changes.last_mut() {
                Some(change) if change.from == from_index => change.value = value,
                _ => result.changes.push(TreeChange {
                    kind: TreeChangeKind::Content,
                    from: from_index,
                    to: from_index,
                    from_path: from_path.clone(),
                    to_path: from_path,
                    actor: edited_at.actor(),
                    value,
                    split_level: 0,
                }),
            }
        }

        result.max_created_at_map = notes.map;
        tracing::debug!(
            actor = %edited_at.actor(),
            lamport = edited_at.lamport(),
            from = from_index,
            removed = removing.len(),
            merged = sources.len(),
            inserted,
            split_level,
            "edited tree"
        );
        Ok(result)
    }

    /// Splits the text an anchor points into and returns the gap as `(parent, left)`.
    ///
    /// `view` is rebuilt, since splitting adds a node.
    pub(super) fn settle(
        &mut self,
        anchor: &Anchor,
        view: &mut View<'_>,
        delta: &mut DataSize,
    ) -> (NodeKey, NodeKey) {
        let Some(split_at) = anchor.split_at else {
            *view = view.rebuild(self);
            return (anchor.parent, anchor.left);
        };
        *delta += self.split_text(anchor.left, split_at);
        *view = view.rebuild(self);
        let parent = view.parent(self, anchor.left).unwrap_or(anchor.parent);
        (parent, anchor.left)
    }

    /// The index of an anchor in the current document, for error reports.
    pub(super) fn anchor_index(&self, anchor: &Anchor) -> usize {
        let split_at = anchor
            .split_at
            .unwrap_or_else(|| self.nodes.size(anchor.left));
        self.nodes
            .index_of(self.to_tree_pos(anchor.parent, anchor.left, split_at))
    }

    /// Moves the children of the removed `sources` into the lineage of `target`.
    ///
    /// Every source is paired with the first fragment of its element, the origin recorded on the
    /// moved children.
    fn merge(
        &mut self,
        view: &View<'_>,
        target: NodeKey,
        sources: &[(NodeKey, NodeKey)],
        notes: &mut Notes,
        result: &mut EditResult,
    ) {
        let edited_at = view.edited_at();
        let mut head = target;
        while !view.known(self, head) {
            match self.node(head).ins_prev.and_then(|id| self.key_of(&id)) {
                Some(prev) => head = prev,
                None => break,
            }
        }
        let chain = self.lineage_from(head, |tree, fragment| !view.known(tree, fragment));
        tracing::trace!(
            sources = sources.len(),
            fragments = chain.len(),
            "merging into the element at the start"
        );

        let source_keys: HashSet<NodeKey> = sources.iter().map(|(source, _)| *source).collect();
        // where the issuer saw each origin, if that is part of this merge
        let origin_parents: HashMap<NodeKey, NodeKey> = sources
            .iter()
            .filter_map(|(_, origin)| {
                let parent = view.parent(self, *origin)?;
                (chain.contains(&parent) || source_keys.contains(&parent))
                    .then_some((*origin, parent))
            })
            .collect();
        let head_id = self.node(head).id;
        for (_, origin) in sources {
            let node = self.nodes.get_mut(*origin);
            if node.merged_into.is_none_or(|link| link.at < edited_at) {
                node.merged_into = Some(MergeLink {
                    id: head_id,
                    at: edited_at,
                });
            }
        }
        for (source, _) in sources {
            for child in view.children(self, *source) {
                notes.note(self, child);
            }
            for child in self.nodes.all_children(*source) {
                notes.note(self, *child);
            }
        }

        for (source, origin) in sources {
            let link = MergeLink {
                id: self.node(*origin).id,
                at: edited_at,
            };
            for child in view.children(self, *source) {
                // moved by a later merge, which decides where it goes
                if self.node(child).merged_at().is_some_and(|at| at > edited_at) {
                    continue;
                }
                let origin_parent = origin_parents.get(origin).copied();
                self.place(&chain, *origin, child, Some(link), origin_parent, result);
            }
        }

        // content merged in unseen follows the source it landed in
        for (source, origin) in sources {
            let hidden: Vec<NodeKey> = self
                .nodes
                .all_children(*source)
                .iter()
                .copied()
                .filter(|child| view.unknown(self, *child))
                .collect();
            let mut carried = create_set();
            for child in &hidden {
                let Some(index) = self.nodes.child_index(*source, *child) else {
                    continue;
                };
                let start = self.block_start(*source, *child);
                carried.extend(self.nodes.all_children(*source)[start..index].iter().copied());
            }
            let link = MergeLink {
                id: self.node(*origin).id,
                at: edited_at,
            };
            for child in hidden {
                if carried.contains(&child) {
                    continue;
                }
                let origin_parent = origin_parents.get(origin).copied();
                self.place(&chain, *origin, child, Some(link), origin_parent, result);
            }
        }
    }

    /// Moves `child` into the lineage `chain` as content merged out of `origin`.
    ///
    /// Content lifted out of `child` by earlier merges travels with it. Next to `origin` if that
    /// sits in the chain, else at the end of the chain's last fragment, before content brought in
    /// by later merges.
    fn place(
        &mut self,
        chain: &[NodeKey],
        mut origin: NodeKey,
        child: NodeKey,
        mut link: Option<MergeLink>,
        origin_parent: Option<NodeKey>,
        result: &mut EditResult,
    ) {
        let mut chain = chain.to_vec();
        // the origin itself moved unseen: the content goes with it
        if let (Some(expected), Some(actual)) = (origin_parent, self.nodes.parent(origin)) {
            if expected != actual {
                chain = vec![actual];
            }
        }
        // a target emptied by another merge passes its content on
        let mut followed = create_set();
        while let Some(&target) = chain.first() {
            let node = self.node(target);
            let (Some(_), Some(into)) = (node.removed_at, node.merged_into) else {
                break;
            };
            let Some(next) = self.key_of(&into.id) else {
                break;
            };
            if !followed.insert(target) {
                break;
            }
            link = Some(MergeLink {
                id: node.id,
                at: into.at,
            });
            origin = target;
            chain = self.lineage_from(next, |tree, fragment| tree.created_at(fragment).after(&into.at));
        }
        let (Some(&last), Some(current)) = (chain.last(), self.nodes.parent(child)) else {
            return;
        };

        let start = self.block_start(current, child);
        let end = self
            .nodes
            .child_index(current, child)
            .map_or(start, |index| index + 1);
        let block = self.nodes.all_children(current)[start..end].to_vec();
        for key in &block {
            self.nodes.detach(*key);
        }

        let beside_origin = self
            .nodes
            .parent(origin)
            .filter(|parent| chain.contains(parent));
        let (target, index) = match beside_origin {
            Some(parent) => (
                parent,
                self.nodes.child_index(parent, origin).unwrap_or_default(),
            ),
            None => {
                // appended content keeps the order of the merges that brought it
                let children = self.nodes.all_children(last);
                let mut index = children.len();
                if let Some(link) = link {
                    while index > 0
                        && self
                            .node(children[index - 1])
                            .merged_at()
                            .is_some_and(|at| at > link.at)
                    {
                        index -= 1;
                    }
                }
                (last, index)
            }
        };
        for (offset, key) in block.iter().enumerate() {
            self.nodes.insert_at(target, index + offset, *key);
        }
        self.nodes.get_mut(child).merged_from = link;
        if let Some(removed_at) = self.node(target).removed_at {
            for key in &block {
                self.remove_subtree(*key, removed_at, result);
            }
        }
    }

    /// The index of the first child of `parent` that belongs to the block of `child`: the content
    /// merged out of `child`, or out of that content, sits right before it.
    fn block_start(&self, parent: NodeKey, child: NodeKey) -> usize {
        let children = self.nodes.all_children(parent);
        let Some(mut index) = self.nodes.child_index(parent, child) else {
            return 0;
        };
        let mut ids = vec![self.node(child).id];
        while index > 0
            && self
                .node(children[index - 1])
                .merged_from
                .is_some_and(|link| ids.contains(&link.id))
        {
            index -= 1;
            ids.push(self.node(children[index]).id);
        }
        index
    }

    /// The children a split of `parent` after `left` moves into the clone, in physical order.
    fn split_tail(&self, view: &View<'_>, parent: NodeKey, left: NodeKey) -> Vec<NodeKey> {
        let start = view.after(self, parent, left);
        let mut tail: Vec<NodeKey> = view
            .children(self, parent)
            .into_iter()
            .skip(start)
            .filter(|child| self.nodes.parent(*child) == Some(parent))
            .collect();
        // content merged in unseen goes by where the issuer saw it
        let gap = self.gap_key(
            view,
            &Anchor {
                parent,
                left,
                split_at: None,
            },
        );
        let hidden: Vec<NodeKey> = self
            .nodes
            .all_children(parent)
            .iter()
            .copied()
            .filter(|child| {
                view.unknown(self, *child) && !tail.contains(child) && view.path(self, *child) > gap
            })
            .collect();
        tail.extend(hidden);
        tail.sort_by_key(|child| self.nodes.child_index(parent, *child));
        tail
    }

    /// Inserts the detached `key` at the gap after `left` in `parent`, as seen through `view`.
    fn insert_at_gap(
        &mut self,
        view: &View<'_>,
        parent: NodeKey,
        left: NodeKey,
        key: NodeKey,
        result: &mut EditResult,
    ) {
        let left_parent = self.nodes.parent(left);
        let first = view.children(self, parent).first().copied();
        let first_moved = first.filter(|first| self.nodes.parent(*first) != Some(parent));
        if left != parent && left_parent != Some(parent) {
            // `left` was moved by a merge: follow it
            let actual = left_parent.unwrap_or(parent);
            let index = self
                .nodes
                .child_index(actual, left)
                .map_or(0, |index| index + 1);
            let link = self.node(left).merged_from;
            self.nodes.insert_at(actual, index, key);
            self.nodes.get_mut(key).merged_from = link;
        } else if let (true, Some(first)) = (left == parent, first_moved) {
            let Some(actual) = self.nodes.parent(first) else {
                return;
            };
            let index = self.block_start(actual, first);
            let link = self.node(first).merged_from;
            self.nodes.insert_at(actual, index, key);
            self.nodes.get_mut(key).merged_from = link;
        } else if left == parent
            && self.nodes.is_removed(parent)
            && self.node(parent).merged_into.is_some()
        {
            self.nodes.insert_at(parent, 0, key);
            self.place(&[parent], parent, key, None, None, result);
            return;
        } else {
            let index = if left == parent {
                0
            } else {
                self.nodes
                    .child_index(parent, left)
                    .map_or(0, |index| index + 1)
            };
            self.nodes.insert_at(parent, index, key);
        }
        if let Some(removed_at) = self
            .nodes
            .parent(key)
            .and_then(|parent| self.node(parent).removed_at)
        {
            self.remove_subtree(key, removed_at, result);
        }
    }

    /// `key` followed by the fragments split off from it, for as long as `follow` accepts them.
    fn lineage_from(
        &self,
        key: NodeKey,
        follow: impl Fn(&Self, NodeKey) -> bool,
    ) -> Vec<NodeKey> {
        let mut lineage = vec![key];
        let mut next = self.node(key).ins_next.and_then(|id| self.key_of(&id));
        while let Some(fragment) = next {
            if !follow(self, fragment) {
                break;
            }
            lineage.push(fragment);
            next = self.node(fragment).ins_next.and_then(|id| self.key_of(&id));
        }
        lineage
    }

    /// Tombstones `key`; a node that is already removed keeps its earliest removal.
    fn tombstone(&mut self, key: NodeKey, removed_at: Ticket, result: &mut EditResult) {
        let was_removed = self.nodes.is_removed(key);
        self.nodes.remove_node(key, |node| node.remove(removed_at));
        if !was_removed {
            result.gc_pairs.push(GcPair::Node {
                id: self.node(key).id,
                removed_at,
            });
            result.data_size_delta.meta += mem::size_of::<Ticket>();
        }
    }

    fn remove_subtree(&mut self, key: NodeKey, removed_at: Ticket, result: &mut EditResult) {
        for node in self.nodes.descendants(key) {
            self.tombstone(node, removed_at, result);
        }
    }

    /// Splits the text node `key` after `at` characters.
    fn split_text(&mut self, key: NodeKey, at: usize) -> DataSize {
        if at == 0 || at >= self.node(key).text_len() {
            return DataSize::default();
        }
        let mut tail = String::new();
        self.nodes
            .resize_text(key, |node| tail = node.split_value(at));

        let node = self.node(key);
        let id = TreeNodeId::new(node.id.created_at(), node.id.offset() + at as u32);
        let mut fragment = CrdtNode::text(id, tail);
        fragment.removed_at = node.removed_at;
        fragment.merged_from = node.merged_from;
        let meta = fragment.data_size().meta;
        self.insert_fragment(key, fragment);
        DataSize { data: 0, meta }
    }

    /// Splits the element `key`, moving `tail`, children of `key`, into a new element inserted
    /// right after it.
    fn split_element(
        &mut self,
        key: NodeKey,
        tail: &[NodeKey],
        issuer: &mut impl TicketIssuer,
    ) -> DataSize {
        let node = self.node(key);
        let NodeKind::Element { tag, .. } = &node.kind else {
            return DataSize::default();
        };
        let id = TreeNodeId::from(issuer.issue_ticket());
        let mut clone = CrdtNode::element(id, tag.clone(), node.attributes.clone());
        clone.removed_at = node.removed_at;
        clone.merged_from = node.merged_from;
        let size = clone.data_size();
        let clone_key = self.insert_fragment(key, clone);

        tracing::trace!(split = ?id, moved = tail.len(), "splitting element");
        for (index, child) in tail.iter().enumerate() {
            self.nodes.move_to(*child, clone_key, index);
        }
        size
    }

    /// Inserts `fragment` right after `key` and links it into the split lineage of `key`.
    fn insert_fragment(&mut self, key: NodeKey, mut fragment: CrdtNode) -> NodeKey {
        let node = self.node(key);
        let (id, next) = (node.id, node.ins_next);
        fragment.ins_prev = Some(id);
        fragment.ins_next = next;
        if let Some(next) = next.and_then(|next| self.key_of(&next)) {
            self.nodes.get_mut(next).ins_prev = Some(fragment.id);
        }
        self.nodes.get_mut(key).ins_next = Some(fragment.id);

        let fragment_key = self.nodes.alloc(fragment);
        self.register(fragment_key);
        if let Some(parent) = self.nodes.parent(key) {
            self.nodes.insert_after(parent, Some(key), fragment_key);
        }
        fragment_key
    }

    fn subtree_data_size(&self, key: NodeKey) -> DataSize {
        self.nodes
            .descendants(key)
            .into_iter()
            .map(|node| self.node(node).data_size())
            .sum()
    }

    /// Whether `key` and all its ancestors are alive.
    pub(super) fn is_live(&self, key: NodeKey) -> bool {
        let mut node = Some(key);
        while let Some(current) = node {
            if self.nodes.is_removed(current) {
                return false;
            }
            node = self.nodes.parent(current);
        }
        true
    }

    /// The index range a token covers in the current document, if it is visible.
    fn live_span(&self, token: ViewToken) -> Option<(usize, usize)> {
        let key = token.node();
        if !self.is_live(key) {
            return None;
        }
        let parent = self.nodes.parent(key)?;
        let start = self.nodes.index_of(TreePos {
            node: parent,
            offset: self.nodes.find_offset(parent, key),
        });
        Some(match token {
            ViewToken::Text(_) => (start, start + self.nodes.size(key)),
            ViewToken::Start(_) => (start, start + 1),
            ViewToken::End(_) => {
                let end = start + self.nodes.padded_size(key);
                (end - 1, end)
            }
        })
    }

    /// Turns the tokens an edit removes into contiguous index ranges, last range first.
    ///
    /// Must run before the removal, on the document the changes describe.
    fn deletion_changes(
        &self,
        tokens: &[ViewToken],
        removing: &HashSet<NodeKey>,
        view: &View<'_>,
        edited_at: Ticket,
    ) -> Result<Vec<TreeChange>, TreeError> {
        let mut spans: Vec<(usize, usize)> = tokens
            .iter()
            .filter(|token| match token {
                ViewToken::End(key) => removing.contains(key) || view.known(self, *key),
                ViewToken::Start(key) | ViewToken::Text(key) => removing.contains(key),
            })
            .filter_map(|token| self.live_span(*token))
            .collect();
        spans.sort_unstable();

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for (start, end) in spans {
            match ranges.last_mut() {
                Some((_, last)) if *last >= start => *last = (*last).max(end),
                _ => ranges.push((start, end)),
            }
        }
        ranges
            .into_iter()
            .rev()
            .map(|(from, to)| {
                Ok(TreeChange {
                    kind: TreeChangeKind::Content,
                    from,
                    to,
                    from_path: self.nodes.index_to_path(from)?,
                    to_path: self.nodes.index_to_path(to)?,
                    actor: edited_at.actor(),
                    value: None,
                    split_level: 0,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActorId, TicketSequence, tree::tests::tree_from, tree_node};

    const ACTOR: ActorId = ActorId::new(1);

    /// Applies a local edit by index, the way a replica edits its own copy.
    fn edit(
        tree: &mut CrdtTree,
        lamport: u64,
        (from, to): (usize, usize),
        contents: &[TreeNode],
        split_level: u32,
    ) -> EditResult {
        let mut issuer = TicketSequence::after(Ticket::new(lamport, 0, ACTOR));
        let contents = contents
            .iter()
            .map(|node| TreeContent::stamp(node, &mut issuer))
            .collect();
        let edited_at = issuer.issue_ticket();
        let (from, to) = tree.index_range_to_pos_range((from, to)).unwrap();
        tree.edit(
            (&from, &to),
            contents,
            split_level,
            edited_at,
            None,
            &mut issuer,
        )
        .unwrap()
    }

    #[test]
    fn delete_text_inside_a_paragraph() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let result = edit(&mut tree, 2, (2, 4), &[], 0);
        assert_eq!(tree.to_xml(), "<root><p>ad</p></root>");
        assert_eq!(tree.root_size(), 4);
        assert_eq!(result.gc_pairs.len(), 1);
        assert_eq!(result.changes.len(), 1);
        assert_eq!((result.changes[0].from, result.changes[0].to), (2, 4));
        assert_eq!(result.changes[0].from_path, vec![0, 1]);
        // one live fragment on each side of the tombstone
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.tombstone_count(), 1);
    }

    #[test]
    fn insert_text_and_elements() {
        let mut tree = tree_from(tree_node!(root [p ["ab"]]));
        edit(&mut tree, 2, (2, 2), &[tree_node!("xy")], 0);
        assert_eq!(tree.to_xml(), "<root><p>axyb</p></root>");
        edit(&mut tree, 3, (6, 6), &[tree_node!(i ["c"]), tree_node!(b [])], 0);
        assert_eq!(tree.to_xml(), "<root><p>axyb</p><i>c</i><b></b></root>");
        assert_eq!(tree.root_size(), 11);
    }

    #[test]
    fn merge_paragraphs() {
        let mut tree = tree_from(tree_node!(root [p ["ab"], p ["cd"]]));
        let result = edit(&mut tree, 2, (2, 6), &[], 0);
        assert_eq!(tree.to_xml(), "<root><p>ad</p></root>");
        assert_eq!(result.changes.len(), 1);
        assert_eq!((result.changes[0].from, result.changes[0].to), (2, 6));
    }

    #[test]
    fn merged_content_links_back_to_its_element() {
        let mut tree = tree_from(tree_node!(root [p ["ab"], p ["cd"]]));
        let second = tree.index_tree().all_children(tree.index_tree().root())[1];
        let second_id = tree.index_tree().get(second).id();
        edit(&mut tree, 2, (3, 5), &[], 0);

        let first_id = tree.first_child_id();
        let into = tree.get(&second_id).unwrap().merged_into().unwrap();
        assert_eq!(into.id, first_id);
        let first = tree.index_tree().all_children(tree.index_tree().root())[0];
        let moved = tree.index_tree().all_children(first)[1];
        let from = tree.index_tree().get(moved).merged_from().unwrap();
        assert_eq!(from.id, second_id);
        assert_eq!(from.at, into.at);
    }

    #[test]
    fn deleting_an_opening_tag_lifts_the_content() {
        let mut tree = tree_from(tree_node!(r [p ["ab"], p ["cd"]]));
        let result = edit(&mut tree, 2, (0, 1), &[], 0);
        assert_eq!(tree.to_xml(), "<r>ab<p>cd</p></r>");
        assert_eq!(tree.root_size(), 6);
        let ranges: Vec<_> = result.changes.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(ranges, vec![(0, 1)]);
    }

    #[test]
    fn reversed_range_is_rejected_before_splitting() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let from = tree.find_pos(4).unwrap();
        let to = tree.find_pos(2).unwrap();
        let before = tree.to_node_records();
        let edited_at = Ticket::new(2, 1, ACTOR);
        assert_eq!(
            tree.edit((&from, &to), vec![], 0, edited_at, None, &mut TicketSequence::after(edited_at))
                .unwrap_err(),
            TreeError::InvalidRange { from: 4, to: 2 }
        );
        assert_eq!(tree.to_node_records(), before);
    }

    #[test]
    fn reversed_remote_range_collapses() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let from = tree.find_pos(4).unwrap();
        let to = tree.find_pos(2).unwrap();
        let edited_at = Ticket::new(2, 1, ActorId::new(2));
        let map = MaxCreatedAtMap::from([(ACTOR, Ticket::new(1, 9, ACTOR))]);
        let result = tree
            .edit((&from, &to), vec![], 0, edited_at, Some(&map), &mut TicketSequence::after(edited_at))
            .unwrap();
        assert_eq!(tree.to_xml(), "<root><p>abcd</p></root>");
        assert!(result.changes.is_empty());
        assert!(result.gc_pairs.is_empty());
    }

    #[test]
    fn merge_at_the_boundary() {
        let mut tree = tree_from(tree_node!(root [p ["ab"], p ["cd"]]));
        edit(&mut tree, 2, (3, 5), &[], 0);
        assert_eq!(tree.to_xml(), "<root><p>abcd</p></root>");
        assert_eq!(tree.root_size(), 6);
    }

    #[test]
    fn split_paragraph() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let result = edit(&mut tree, 2, (3, 3), &[], 1);
        assert_eq!(tree.to_xml(), "<root><p>ab</p><p>cd</p></root>");
        assert_eq!(result.changes[0].split_level, 1);

        let clone = tree.index_tree().all_children(tree.index_tree().root())[1];
        let clone = tree.index_tree().get(clone);
        assert_eq!(clone.created_at(), Ticket::new(2, 2, ACTOR));
        assert_eq!(clone.ins_prev_id(), Some(tree.first_child_id()));
    }

    #[test]
    fn split_two_levels() {
        let mut tree = tree_from(tree_node!(root [ul [li ["ab"]]]));
        edit(&mut tree, 2, (3, 3), &[], 2);
        assert_eq!(
            tree.to_xml(),
            "<root><ul><li>a</li></ul><ul><li>b</li></ul></root>"
        );
    }

    #[test]
    fn split_stops_at_the_root() {
        let mut tree = tree_from(tree_node!(root [p ["ab"]]));
        edit(&mut tree, 2, (2, 2), &[], 5);
        assert_eq!(tree.to_xml(), "<root><p>a</p><p>b</p></root>");
    }

    #[test]
    fn split_then_insert_lands_in_the_left_part() {
        let mut tree = tree_from(tree_node!(root [p ["ab"]]));
        edit(&mut tree, 2, (2, 2), &[tree_node!("x")], 1);
        assert_eq!(tree.to_xml(), "<root><p>ax</p><p>b</p></root>");
    }

    #[test]
    fn unknown_nodes_survive_a_remote_delete() {
        let mut tree = tree_from(tree_node!(root [p ["ab"], p ["cd"]]));
        // the issuer only knew the first paragraph
        let pos = |tree: &CrdtTree, index| tree.find_pos(index).unwrap();
        let (from, to) = (pos(&tree, 2), pos(&tree, 6));
        let start = Ticket::new(2, 0, ACTOR);
        let mut issuer = TicketSequence::after(start);
        let map = MaxCreatedAtMap::from([(ACTOR, Ticket::new(1, 3, ACTOR))]);
        let result = tree
            .edit((&from, &to), vec![], 0, start.successor(), Some(&map), &mut issuer)
            .unwrap();
        // "cd" and the second paragraph are newer than the map allows
        assert_eq!(tree.to_xml(), "<root><p>a</p><p>cd</p></root>");
        let ranges: Vec<_> = result.changes.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(ranges, vec![(2, 4)]);
    }

    #[test]
    fn deleting_twice_is_idempotent() {
        let mut tree = tree_from(tree_node!(root [p ["abc"], i []]));
        let (from, to) = tree.index_range_to_pos_range((2, 7)).unwrap();
        let edited_at = Ticket::new(2, 1, ACTOR);
        let first = tree
            .edit((&from, &to), vec![], 0, edited_at, None, &mut TicketSequence::after(edited_at))
            .unwrap();
        let xml = tree.to_xml();
        let records = tree.to_node_records();
        let second = tree
            .edit(
                (&from, &to),
                vec![],
                0,
                edited_at,
                Some(&first.max_created_at_map),
                &mut TicketSequence::after(edited_at),
            )
            .unwrap();
        assert_eq!(xml, "<root><p>a</p></root>");
        assert_eq!(tree.to_xml(), xml);
        assert_eq!(tree.to_node_records(), records);
        assert!(second.gc_pairs.is_empty());
    }

    #[test]
    fn insert_into_removed_parent_is_tombstoned() {
        let mut tree = tree_from(tree_node!(root [p ["ab"]]));
        let inside = tree.find_pos(2).unwrap();
        edit(&mut tree, 2, (0, 4), &[], 0);
        assert_eq!(tree.to_xml(), "<root></root>");

        let edited_at = Ticket::new(2, 2, ActorId::new(2));
        let content = TreeContent::stamp(
            &tree_node!("x"),
            &mut TicketSequence::after(Ticket::new(2, 0, ActorId::new(2))),
        );
        let result = tree
            .edit(
                (&inside, &inside),
                vec![content],
                0,
                edited_at,
                Some(&MaxCreatedAtMap::new()),
                &mut TicketSequence::after(edited_at),
            )
            .unwrap();
        assert_eq!(tree.to_xml(), "<root></root>");
        assert_eq!(tree.root_size(), 0);
        assert_eq!(result.gc_pairs.len(), 1);
        assert_eq!(result.changes[0].value, None);
    }

    #[test]
    fn invalid_contents_leave_the_tree_untouched() {
        let mut tree = tree_from(tree_node!(root [p ["ab"]]));
        let pos = tree.find_pos(2).unwrap();
        let mut issuer = TicketSequence::after(Ticket::new(2, 0, ACTOR));
        let contents = vec![
            TreeContent::stamp(&tree_node!("x"), &mut issuer),
            TreeContent::stamp(&tree_node!(b []), &mut issuer),
        ];
        let before = tree.to_node_records();
        let edited_at = issuer.issue_ticket();
        assert_eq!(
            tree.edit((&pos, &pos), contents, 0, edited_at, None, &mut issuer)
                .unwrap_err(),
            TreeError::MixedContent
        );
        assert_eq!(tree.to_node_records(), before);
    }

    #[test]
    fn data_size_delta_matches_the_tree() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let before = tree.data_size();
        let result = edit(&mut tree, 2, (2, 4), &[tree_node!("xyz")], 1);
        assert_eq!(before + result.data_size_delta, tree.data_size());
    }

    #[test]
    fn insert_at_start_of_deletion_is_one_change() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let result = edit(&mut tree, 2, (2, 4), &[tree_node!("x")], 0);
        assert_eq!(tree.to_xml(), "<root><p>axd</p></root>");
        assert_eq!(result.changes.len(), 1);
        assert_eq!(
            result.changes[0].value,
            Some(TreeChangeValue::Content(vec![tree_node!("x")]))
        );
    }

    impl CrdtTree {
        fn first_child_id(&self) -> TreeNodeId {
            let first = self.index_tree().all_children(self.index_tree().root())[0];
            self.index_tree().get(first).id()
        }
    }
}
