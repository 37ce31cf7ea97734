// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Index- and path-based editing of a local tree.
//!
//! A [`Tree`] handle wraps a [`CrdtTree`] and translates the integer indices and paths an editor
//! works with into [`CrdtTreePos`]itions. Every mutation applies locally right away and returns an
//! operation record to send to the other replicas.
//!
//! Tickets come from a [`ChangeContext`], which groups the mutations of a single change under one
//! lamport of the actor's [`LogicalClock`].
use crate::{
    ActorId, LogicalClock, Ticket, TicketIssuer, TreeError,
    operation::{TreeEditOperation, TreeStyleOperation},
    tree::{CrdtTree, CrdtTreePos, TreeContent, TreeNode, validate_tree_nodes},
};
use std::collections::BTreeMap;

/// The tickets of one local change.
///
/// Creating a context starts a new change on the clock; everything stamped through it shares the
/// change's lamport.
#[derive(Debug)]
pub struct ChangeContext<'a> {
    clock: &'a mut LogicalClock,
}

impl<'a> ChangeContext<'a> {
    pub fn new(clock: &'a mut LogicalClock) -> Self {
        clock.next_change();
        Self { clock }
    }

    pub fn actor(&self) -> ActorId {
        self.clock.actor()
    }

    pub fn lamport(&self) -> u64 {
        self.clock.lamport()
    }
}

impl TicketIssuer for ChangeContext<'_> {
    fn issue_ticket(&mut self) -> Ticket {
        self.clock.issue_ticket()
    }
}

/// A handle to a tree document.
///
/// A handle created with [`Tree::new`] only holds the initial content. It has to be bound with
/// [`Tree::initialize`] before it can be read or edited; until then every accessor returns
/// [`TreeError::Uninitialized`].
#[derive(Clone, Debug)]
pub struct Tree {
    initial: Option<TreeNode>,
    tree: Option<CrdtTree>,
}

impl Tree {
    /// Creates an unbound handle whose document will start out as `root`.
    pub fn new(root: TreeNode) -> Self {
        Self {
            initial: Some(root),
            tree: None,
        }
    }

    /// Creates a bound handle around an existing tree, e.g. one received from another replica.
    pub fn from_crdt(tree: CrdtTree) -> Self {
        Self {
            initial: None,
            tree: Some(tree),
        }
    }

    /// Stamps the initial content with tickets from `ctx` and binds the handle to it.
    ///
    /// Does nothing if the handle is already bound.
    pub fn initialize(&mut self, ctx: &mut ChangeContext<'_>) -> Result<(), TreeError> {
        if self.tree.is_some() {
            return Ok(());
        }
        let Some(root) = &self.initial else {
            return Err(TreeError::Uninitialized);
        };
        if root.is_text() {
            return Err(TreeError::MalformedTree("the root must be an element"));
        }
        validate_tree_nodes(std::slice::from_ref(root))?;
        let tree = CrdtTree::new(TreeContent::stamp(root, ctx))?;
        tracing::debug!(actor = %ctx.actor(), nodes = tree.node_count(), "initialized tree");
        self.tree = Some(tree);
        self.initial = None;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.tree.is_some()
    }

    pub fn crdt(&self) -> Result<&CrdtTree, TreeError> {
        self.tree.as_ref().ok_or(TreeError::Uninitialized)
    }

    /// The underlying tree, for executing remote operations.
    pub fn crdt_mut(&mut self) -> Result<&mut CrdtTree, TreeError> {
        self.tree.as_mut().ok_or(TreeError::Uninitialized)
    }

    /// Replaces `from..to` with `contents` and splits the element at `from` by `split_level`
    /// levels.
    ///
    /// `contents` must be either all text or all elements, and must not contain empty text.
    pub fn edit(
        &mut self,
        ctx: &mut ChangeContext<'_>,
        from: usize,
        to: usize,
        contents: &[TreeNode],
        split_level: u32,
    ) -> Result<TreeEditOperation, TreeError> {
        let tree = self.crdt_mut()?;
        if from > to {
            return Err(TreeError::InvalidRange { from, to });
        }
        validate_tree_nodes(contents)?;
        let range = tree.index_range_to_pos_range((from, to))?;
        Self::edit_at(tree, ctx, range, contents, split_level)
    }

    /// [`Tree::edit`] with the range given as paths of equal length.
    pub fn edit_by_path(
        &mut self,
        ctx: &mut ChangeContext<'_>,
        from_path: &[usize],
        to_path: &[usize],
        contents: &[TreeNode],
        split_level: u32,
    ) -> Result<TreeEditOperation, TreeError> {
        let tree = self.crdt_mut()?;
        let range = Self::path_range(tree, from_path, to_path)?;
        validate_tree_nodes(contents)?;
        Self::edit_at(tree, ctx, range, contents, split_level)
    }

    fn edit_at(
        tree: &mut CrdtTree,
        ctx: &mut ChangeContext<'_>,
        (from, to): (CrdtTreePos, CrdtTreePos),
        contents: &[TreeNode],
        split_level: u32,
    ) -> Result<TreeEditOperation, TreeError> {
        let contents: Vec<TreeContent> = contents
            .iter()
            .map(|node| TreeContent::stamp(node, ctx))
            .collect();
        // split clones take the tickets after this one, in the same order on every replica
        let edited_at = ctx.issue_ticket();
        let result = tree.edit(
            (&from, &to),
            contents.clone(),
            split_level,
            edited_at,
            None,
            ctx,
        )?;
        Ok(TreeEditOperation {
            from,
            to,
            contents,
            split_level,
            max_created_at_map: result.max_created_at_map,
            executed_at: edited_at,
        })
    }

    /// Sets `attributes` on the elements with a tag inside `from..to`.
    pub fn style(
        &mut self,
        ctx: &mut ChangeContext<'_>,
        from: usize,
        to: usize,
        attributes: &BTreeMap<String, String>,
    ) -> Result<TreeStyleOperation, TreeError> {
        let tree = self.crdt_mut()?;
        if from > to {
            return Err(TreeError::InvalidRange { from, to });
        }
        let range = tree.index_range_to_pos_range((from, to))?;
        Self::style_at(tree, ctx, range, attributes, &[])
    }

    /// [`Tree::style`] with the range given as paths of equal length.
    pub fn style_by_path(
        &mut self,
        ctx: &mut ChangeContext<'_>,
        from_path: &[usize],
        to_path: &[usize],
        attributes: &BTreeMap<String, String>,
    ) -> Result<TreeStyleOperation, TreeError> {
        let tree = self.crdt_mut()?;
        let range = Self::path_range(tree, from_path, to_path)?;
        Self::style_at(tree, ctx, range, attributes, &[])
    }

    /// Removes the attributes named by `keys` from the elements with a tag inside `from..to`.
    pub fn remove_style(
        &mut self,
        ctx: &mut ChangeContext<'_>,
        from: usize,
        to: usize,
        keys: &[String],
    ) -> Result<TreeStyleOperation, TreeError> {
        let tree = self.crdt_mut()?;
        if from > to {
            return Err(TreeError::InvalidRange { from, to });
        }
        let range = tree.index_range_to_pos_range((from, to))?;
        Self::style_at(tree, ctx, range, &BTreeMap::new(), keys)
    }

    fn style_at(
        tree: &mut CrdtTree,
        ctx: &mut ChangeContext<'_>,
        (from, to): (CrdtTreePos, CrdtTreePos),
        attributes: &BTreeMap<String, String>,
        keys: &[String],
    ) -> Result<TreeStyleOperation, TreeError> {
        let edited_at = ctx.issue_ticket();
        let mut max_created_at_map = Default::default();
        if !attributes.is_empty() {
            max_created_at_map = tree
                .style((&from, &to), attributes, edited_at, None)?
                .max_created_at_map;
        }
        if !keys.is_empty() {
            max_created_at_map = tree
                .remove_style((&from, &to), keys, edited_at, None)?
                .max_created_at_map;
        }
        Ok(TreeStyleOperation {
            from,
            to,
            attributes_to_set: attributes.clone(),
            attributes_to_remove: keys.to_vec(),
            max_created_at_map,
            executed_at: edited_at,
        })
    }

    /// Resolves a path range, which must consist of non-empty paths of equal length.
    fn path_range(
        tree: &CrdtTree,
        from_path: &[usize],
        to_path: &[usize],
    ) -> Result<(CrdtTreePos, CrdtTreePos), TreeError> {
        if from_path.len() != to_path.len() {
            return Err(TreeError::PathLengthMismatch {
                from: from_path.len(),
                to: to_path.len(),
            });
        }
        if from_path.is_empty() {
            return Err(TreeError::EmptyPath);
        }
        let (from, to) = tree.path_range_to_pos_range((from_path, to_path))?;
        let (from_index, to_index) = tree.pos_range_to_index_range((&from, &to))?;
        if from_index > to_index {
            return Err(TreeError::InvalidRange {
                from: from_index,
                to: to_index,
            });
        }
        Ok((from, to))
    }

    /// The size of the document in index space.
    pub fn size(&self) -> Result<usize, TreeError> {
        Ok(self.crdt()?.root_size())
    }

    pub fn to_xml(&self) -> Result<String, TreeError> {
        Ok(self.crdt()?.to_xml())
    }

    /// The live document as a plain value.
    pub fn to_tree_node(&self) -> Result<TreeNode, TreeError> {
        Ok(self.crdt()?.to_tree_node())
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<serde_json::Value, TreeError> {
        Ok(self.crdt()?.to_json())
    }

    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>, TreeError> {
        self.crdt()?.index_to_path(index)
    }

    pub fn path_to_index(&self, path: &[usize]) -> Result<usize, TreeError> {
        if path.is_empty() {
            return Err(TreeError::EmptyPath);
        }
        self.crdt()?.path_to_index(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_node;

    fn initialized(root: TreeNode) -> (LogicalClock, Tree) {
        let mut clock = LogicalClock::new(ActorId::new(1));
        let mut tree = Tree::new(root);
        tree.initialize(&mut ChangeContext::new(&mut clock)).unwrap();
        (clock, tree)
    }

    #[test]
    fn unbound_handle_is_uninitialized() {
        let mut tree = Tree::new(tree_node!(doc []));
        let mut clock = LogicalClock::new(ActorId::new(1));
        let mut ctx = ChangeContext::new(&mut clock);
        assert_eq!(tree.to_xml(), Err(TreeError::Uninitialized));
        assert_eq!(tree.size(), Err(TreeError::Uninitialized));
        assert_eq!(
            tree.edit(&mut ctx, 0, 0, &[], 0).unwrap_err(),
            TreeError::Uninitialized
        );
        assert!(!tree.is_initialized());
    }

    #[test]
    fn context_shares_a_lamport() {
        let mut clock = LogicalClock::new(ActorId::new(7));
        let mut ctx = ChangeContext::new(&mut clock);
        let first = ctx.issue_ticket();
        let second = ctx.issue_ticket();
        assert_eq!(ctx.lamport(), 1);
        assert_eq!(first.lamport(), second.lamport());
        assert!(second.after(&first));
        assert_eq!(ctx.actor(), ActorId::new(7));
    }

    #[test]
    fn split_clones_follow_the_edit_ticket() {
        let (mut clock, mut tree) = initialized(tree_node!(doc [p ["ab"]]));
        let op = tree
            .edit(&mut ChangeContext::new(&mut clock), 2, 2, &[], 1)
            .unwrap();
        assert_eq!(tree.to_xml().unwrap(), "<doc><p>a</p><p>b</p></doc>");
        assert_eq!(op.executed_at, Ticket::new(2, 1, ActorId::new(1)));
        let crdt = tree.crdt().unwrap();
        let clone = crdt.index_tree().all_children(crdt.index_tree().root())[1];
        assert_eq!(
            crdt.index_tree().get(clone).created_at(),
            op.executed_at.successor()
        );
    }

    #[test]
    fn style_returns_the_operation() {
        let (mut clock, mut tree) = initialized(tree_node!(doc [p []]));
        let attributes = BTreeMap::from([("a".to_string(), "b".to_string())]);
        let op = tree
            .style(&mut ChangeContext::new(&mut clock), 0, 1, &attributes)
            .unwrap();
        assert_eq!(tree.to_xml().unwrap(), r#"<doc><p a="b"></p></doc>"#);
        assert_eq!(op.attributes_to_set, attributes);
        assert!(op.attributes_to_remove.is_empty());
        assert_eq!(op.max_created_at_map.len(), 1);
    }
}
