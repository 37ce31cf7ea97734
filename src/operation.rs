// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Replayable operation records.
//!
//! Every local mutation made through [`Tree`](crate::Tree) produces one of these. Shipping it to
//! another replica and calling `execute` there reproduces the mutation, resolved against whatever
//! that replica's tree looks like at the time.
use crate::{
    ActorId, MaxCreatedAtMap, Ticket, TicketSequence, TreeError,
    tree::{CrdtTree, CrdtTreePos, EditResult, StyleResult, TreeChange, TreeContent},
};
use std::collections::BTreeMap;

/// A replayable [`CrdtTree::edit`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct TreeEditOperation {
    pub from: CrdtTreePos,
    pub to: CrdtTreePos,
    /// Content to insert at `from`, stamped by the issuing replica.
    pub contents: Vec<TreeContent>,
    pub split_level: u32,
    /// The newest ticket per actor that the issuing replica had seen in the edited range.
    pub max_created_at_map: MaxCreatedAtMap,
    pub executed_at: Ticket,
}

impl TreeEditOperation {
    /// Applies the edit to `tree`.
    ///
    /// Elements split by the edit are stamped with the tickets that follow `executed_at`, which
    /// are the same tickets the issuing replica used.
    pub fn execute(&self, tree: &mut CrdtTree) -> Result<EditResult, TreeError> {
        tracing::trace!(
            actor = %self.executed_at.actor(),
            lamport = self.executed_at.lamport(),
            "executing edit"
        );
        tree.edit(
            (&self.from, &self.to),
            self.contents.clone(),
            self.split_level,
            self.executed_at,
            Some(&self.max_created_at_map),
            &mut TicketSequence::after(self.executed_at),
        )
    }
}

/// A replayable [`CrdtTree::style`] and/or [`CrdtTree::remove_style`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct TreeStyleOperation {
    pub from: CrdtTreePos,
    pub to: CrdtTreePos,
    pub attributes_to_set: BTreeMap<String, String>,
    pub attributes_to_remove: Vec<String>,
    /// The newest ticket per actor that the issuing replica had seen in the styled range.
    pub max_created_at_map: MaxCreatedAtMap,
    pub executed_at: Ticket,
}

impl TreeStyleOperation {
    pub fn execute(&self, tree: &mut CrdtTree) -> Result<StyleResult, TreeError> {
        tracing::trace!(
            actor = %self.executed_at.actor(),
            lamport = self.executed_at.lamport(),
            "executing style"
        );
        let range = (&self.from, &self.to);
        let map = Some(&self.max_created_at_map);
        let mut result = StyleResult::default();
        if !self.attributes_to_set.is_empty() {
            result = tree.style(range, &self.attributes_to_set, self.executed_at, map)?;
        }
        if !self.attributes_to_remove.is_empty() {
            let removed =
                tree.remove_style(range, &self.attributes_to_remove, self.executed_at, map)?;
            result.changes.extend(removed.changes);
            result.gc_pairs.extend(removed.gc_pairs);
            for (actor, created_at) in removed.max_created_at_map {
                let max = result.max_created_at_map.entry(actor).or_insert(created_at);
                *max = (*max).max(created_at);
            }
        }
        Ok(result)
    }
}

/// Any operation on a tree.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum TreeOperation {
    Edit(TreeEditOperation),
    Style(TreeStyleOperation),
}

impl TreeOperation {
    /// Applies the operation to `tree` and returns what changed.
    pub fn execute(&self, tree: &mut CrdtTree) -> Result<Vec<TreeChange>, TreeError> {
        match self {
            TreeOperation::Edit(edit) => edit.execute(tree).map(|result| result.changes),
            TreeOperation::Style(style) => style.execute(tree).map(|result| result.changes),
        }
    }

    pub fn executed_at(&self) -> Ticket {
        match self {
            TreeOperation::Edit(edit) => edit.executed_at,
            TreeOperation::Style(style) => style.executed_at,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.executed_at().actor()
    }
}

impl From<TreeEditOperation> for TreeOperation {
    fn from(edit: TreeEditOperation) -> Self {
        TreeOperation::Edit(edit)
    }
}

impl From<TreeStyleOperation> for TreeOperation {
    fn from(style: TreeStyleOperation) -> Self {
        TreeOperation::Style(style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tree::tests::tree_from, tree_node};

    #[test]
    fn style_operation_sets_and_removes() {
        let mut tree = tree_from(tree_node!(root [p { a: "1" } []]));
        let (from, to) = tree.index_range_to_pos_range((0, 1)).unwrap();
        let op = TreeStyleOperation {
            from,
            to,
            attributes_to_set: BTreeMap::from([("b".to_string(), "2".to_string())]),
            attributes_to_remove: vec!["a".to_string()],
            max_created_at_map: MaxCreatedAtMap::from([(
                ActorId::new(1),
                Ticket::new(1, 9, ActorId::new(1)),
            )]),
            executed_at: Ticket::new(2, 1, ActorId::new(2)),
        };
        let changes = TreeOperation::from(op).execute(&mut tree).unwrap();
        assert_eq!(tree.to_xml(), r#"<root><p b="2"></p></root>"#);
        assert_eq!(changes.len(), 2);
    }

    #[cfg(feature = "json")]
    #[test]
    fn operations_survive_serialization() {
        let tree = tree_from(tree_node!(root [p ["ab"]]));
        let (from, to) = tree.index_range_to_pos_range((1, 3)).unwrap();
        let op = TreeOperation::from(TreeEditOperation {
            from,
            to,
            contents: vec![],
            split_level: 0,
            max_created_at_map: MaxCreatedAtMap::new(),
            executed_at: Ticket::new(2, 1, ActorId::new(1)),
        });
        let json = serde_json::to_string(&op).unwrap();
        let back: TreeOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
        assert_eq!(back.actor(), ActorId::new(1));
    }
}
