// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{DataSize, TreeNode, TreeNodeId};
use crate::{ActorId, MaxCreatedAtMap, Ticket};
use std::collections::BTreeMap;

/// What kind of change a [`TreeChange`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum TreeChangeKind {
    /// Content was inserted, removed, split or merged.
    Content,
    Style,
    RemoveStyle,
}

/// The payload of a [`TreeChange`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum TreeChangeValue {
    /// Inserted nodes.
    Content(Vec<TreeNode>),
    /// Attributes that were set.
    Attributes(BTreeMap<String, String>),
    /// Keys of attributes that were removed.
    AttributeKeys(Vec<String>),
}

/// A description of an applied edit or style, for observers such as an editor binding.
///
/// `from..to` is the affected index range in the document as it was before the change.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct TreeChange {
    pub kind: TreeChangeKind,
    pub from: usize,
    pub to: usize,
    pub from_path: Vec<usize>,
    pub to_path: Vec<usize>,
    pub actor: ActorId,
    pub value: Option<TreeChangeValue>,
    pub split_level: u32,
}

/// A tombstone created by an operation, to be collected once every replica has observed it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum GcPair {
    Node {
        id: TreeNodeId,
        removed_at: Ticket,
    },
    Attribute {
        node: TreeNodeId,
        key: String,
        removed_at: Ticket,
    },
}

impl GcPair {
    pub fn removed_at(&self) -> Ticket {
        match self {
            GcPair::Node { removed_at, .. } | GcPair::Attribute { removed_at, .. } => *removed_at,
        }
    }
}

/// The outcome of [`CrdtTree::edit`](super::CrdtTree::edit).
#[derive(Clone, Debug, Default)]
pub struct EditResult {
    /// Changes in reverse document order.
    pub changes: Vec<TreeChange>,
    pub gc_pairs: Vec<GcPair>,
    /// Memory added by new nodes, split fragments and removal tickets.
    pub data_size_delta: DataSize,
    /// The newest ticket per actor that the edit saw: nodes, merges and split fragments.
    pub max_created_at_map: MaxCreatedAtMap,
}

/// The outcome of [`CrdtTree::style`](super::CrdtTree::style) and
/// [`CrdtTree::remove_style`](super::CrdtTree::remove_style).
#[derive(Clone, Debug, Default)]
pub struct StyleResult {
    pub changes: Vec<TreeChange>,
    pub gc_pairs: Vec<GcPair>,
    /// The newest node per actor that the style saw, removals of skipped elements included.
    pub max_created_at_map: MaxCreatedAtMap,
}
