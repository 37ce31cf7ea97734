// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::{
    AttributeRegister, Ticket, TicketIssuer, TreeError,
    index_tree::{ChildList, IndexNode, NodeKey},
};
use std::{
    collections::BTreeMap,
    fmt,
    iter::Sum,
    mem,
    ops::{Add, AddAssign},
};

/// The type name of text nodes.
pub const TEXT_TAG: &str = "text";

/// The identity of a tree node.
///
/// `created_at` is the ticket of the edit that created the node. Splitting a text node produces
/// fragments that keep the `created_at` of the original and differ in `offset`, the position of
/// the fragment's first character in the originally inserted text.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct TreeNodeId {
    created_at: Ticket,
    offset: u32,
}

impl TreeNodeId {
    pub const fn new(created_at: Ticket, offset: u32) -> Self {
        Self { created_at, offset }
    }

    pub fn created_at(&self) -> Ticket {
        self.created_at
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl fmt::Debug for TreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.created_at, self.offset)
    }
}

impl From<Ticket> for TreeNodeId {
    fn from(created_at: Ticket) -> Self {
        Self::new(created_at, 0)
    }
}

/// One end of a merge: the element on the other side and the edit that moved content across.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct MergeLink {
    pub id: TreeNodeId,
    pub at: Ticket,
}

/// The two shapes a node can take. Only elements have children.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Element { tag: String, children: ChildList },
    Text { value: String },
}

/// A node of a [`CrdtTree`](super::CrdtTree).
#[derive(Clone, Debug)]
pub struct CrdtNode {
    pub(crate) id: TreeNodeId,
    pub(crate) kind: NodeKind,
    pub(crate) attributes: AttributeRegister,
    pub(crate) removed_at: Option<Ticket>,
    /// The fragment this one was split off from.
    pub(crate) ins_prev: Option<TreeNodeId>,
    /// The fragment that was split off from this one.
    pub(crate) ins_next: Option<TreeNodeId>,
    /// The removed element this node was moved out of by a merge.
    pub(crate) merged_from: Option<MergeLink>,
    /// Where a merge moved the content of this removed element.
    pub(crate) merged_into: Option<MergeLink>,
}

impl CrdtNode {
    pub(crate) fn element(id: TreeNodeId, tag: String, attributes: AttributeRegister) -> Self {
        Self {
            id,
            kind: NodeKind::Element {
                tag,
                children: ChildList::new(),
            },
            attributes,
            removed_at: None,
            ins_prev: None,
            ins_next: None,
            merged_from: None,
            merged_into: None,
        }
    }

    pub(crate) fn text(id: TreeNodeId, value: String) -> Self {
        Self {
            id,
            kind: NodeKind::Text { value },
            attributes: AttributeRegister::new(),
            removed_at: None,
            ins_prev: None,
            ins_next: None,
            merged_from: None,
            merged_into: None,
        }
    }

    pub fn id(&self) -> TreeNodeId {
        self.id
    }

    pub fn created_at(&self) -> Ticket {
        self.id.created_at
    }

    /// The element's tag, or [`TEXT_TAG`] for text.
    pub fn tag(&self) -> &str {
        match &self.kind {
            NodeKind::Element { tag, .. } => tag,
            NodeKind::Text { .. } => TEXT_TAG,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The value of a text node.
    pub fn value(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text { value } => Some(value),
            NodeKind::Element { .. } => None,
        }
    }

    pub fn attributes(&self) -> &AttributeRegister {
        &self.attributes
    }

    pub fn removed_at(&self) -> Option<Ticket> {
        self.removed_at
    }

    pub fn ins_prev_id(&self) -> Option<TreeNodeId> {
        self.ins_prev
    }

    pub fn ins_next_id(&self) -> Option<TreeNodeId> {
        self.ins_next
    }

    pub fn merged_from(&self) -> Option<MergeLink> {
        self.merged_from
    }

    pub fn merged_into(&self) -> Option<MergeLink> {
        self.merged_into
    }

    /// The ticket of the merge that moved this node, if any.
    pub(crate) fn merged_at(&self) -> Option<Ticket> {
        self.merged_from.map(|link| link.at)
    }

    /// Tombstones the node. A node that is already removed keeps its earliest removal.
    pub(crate) fn remove(&mut self, removed_at: Ticket) {
        match self.removed_at {
            Some(existing) if !existing.after(&removed_at) => {}
            _ => self.removed_at = Some(removed_at),
        }
    }

    /// Cuts the text value after `at` characters and returns the cut-off tail.
    pub(crate) fn split_value(&mut self, at: usize) -> String {
        match &mut self.kind {
            NodeKind::Text { value } => {
                let byte = value
                    .char_indices()
                    .nth(at)
                    .map_or(value.len(), |(byte, _)| byte);
                value.split_off(byte)
            }
            NodeKind::Element { .. } => String::new(),
        }
    }

    pub fn data_size(&self) -> DataSize {
        let (attribute_data, attribute_meta) = self.attributes.data_size();
        let ticket = mem::size_of::<Ticket>();
        let data = self.value().map_or(0, str::len) + attribute_data;
        let meta = ticket + self.removed_at.map_or(0, |_| ticket) + attribute_meta;
        DataSize { data, meta }
    }
}

impl IndexNode for CrdtNode {
    fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text { .. })
    }

    fn text_len(&self) -> usize {
        self.value().map_or(0, |value| value.chars().count())
    }

    fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    fn children(&self) -> &[NodeKey] {
        match &self.kind {
            NodeKind::Element { children, .. } => children,
            NodeKind::Text { .. } => &[],
        }
    }

    fn children_mut(&mut self) -> Option<&mut ChildList> {
        match &mut self.kind {
            NodeKind::Element { children, .. } => Some(children),
            NodeKind::Text { .. } => None,
        }
    }
}

/// The amount of memory held by tree nodes.
///
/// `data` counts text and attribute bytes; `meta` counts the tickets kept alongside them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct DataSize {
    pub data: usize,
    pub meta: usize,
}

impl DataSize {
    pub fn total(&self) -> usize {
        self.data + self.meta
    }
}

impl Add for DataSize {
    type Output = DataSize;

    fn add(self, rhs: Self) -> Self::Output {
        DataSize {
            data: self.data + rhs.data,
            meta: self.meta + rhs.meta,
        }
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for DataSize {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(DataSize::default(), Add::add)
    }
}

/// A plain tree value: what callers insert, and what a live tree reads back as.
///
/// ```rust
/// # use arbor::{TreeNode, tree_node};
/// let node = TreeNode::element("p")
///     .with_attribute("align", "center")
///     .with_child(TreeNode::text("hi"));
/// assert_eq!(node, tree_node!(p { align: "center" } ["hi"]));
/// assert_eq!(node.to_xml(), r#"<p align="center">hi</p>"#);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum TreeNode {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<TreeNode>,
    },
    Text {
        value: String,
    },
}

impl TreeNode {
    pub fn element(tag: impl Into<String>) -> Self {
        TreeNode::Element {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        TreeNode::Text {
            value: value.into(),
        }
    }

    /// Appends a child. Has no effect on text nodes.
    pub fn with_child(mut self, child: TreeNode) -> Self {
        if let TreeNode::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }

    /// Sets an attribute. Has no effect on text nodes.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TreeNode::Element { attributes, .. } = &mut self {
            attributes.insert(key.into(), value.into());
        }
        self
    }

    pub fn is_text(&self) -> bool {
        matches!(self, TreeNode::Text { .. })
    }

    pub fn tag(&self) -> &str {
        match self {
            TreeNode::Element { tag, .. } => tag,
            TreeNode::Text { .. } => TEXT_TAG,
        }
    }

    /// The index-space footprint of this node once inserted.
    pub fn padded_size(&self) -> usize {
        match self {
            TreeNode::Text { value } => value.chars().count(),
            TreeNode::Element { children, .. } => {
                children.iter().map(TreeNode::padded_size).sum::<usize>() + 2
            }
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        match self {
            TreeNode::Text { value } => out.push_str(value),
            TreeNode::Element {
                tag,
                attributes,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (key, value) in attributes {
                    out.push_str(&format!(" {key}=\"{value}\""));
                }
                out.push('>');
                for child in children {
                    child.write_xml(out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

/// A [`TreeNode`] stamped with node ids, ready to be inserted into a tree.
///
/// Edit operations carry their content in this form so that every replica inserts nodes with the
/// same ids.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum TreeContent {
    Element {
        id: TreeNodeId,
        tag: String,
        attributes: BTreeMap<String, String>,
        children: Vec<TreeContent>,
    },
    Text {
        id: TreeNodeId,
        value: String,
    },
}

impl TreeContent {
    /// Assigns a fresh ticket to every node of `node`, in pre-order.
    pub fn stamp(node: &TreeNode, issuer: &mut impl TicketIssuer) -> Self {
        let id = TreeNodeId::from(issuer.issue_ticket());
        match node {
            TreeNode::Text { value } => TreeContent::Text {
                id,
                value: value.clone(),
            },
            TreeNode::Element {
                tag,
                attributes,
                children,
            } => TreeContent::Element {
                id,
                tag: tag.clone(),
                attributes: attributes.clone(),
                children: children
                    .iter()
                    .map(|child| TreeContent::stamp(child, issuer))
                    .collect(),
            },
        }
    }

    pub fn id(&self) -> TreeNodeId {
        match self {
            TreeContent::Element { id, .. } | TreeContent::Text { id, .. } => *id,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, TreeContent::Text { .. })
    }

    pub fn to_tree_node(&self) -> TreeNode {
        match self {
            TreeContent::Text { value, .. } => TreeNode::text(value.clone()),
            TreeContent::Element {
                tag,
                attributes,
                children,
                ..
            } => TreeNode::Element {
                tag: tag.clone(),
                attributes: attributes.clone(),
                children: children.iter().map(TreeContent::to_tree_node).collect(),
            },
        }
    }
}

/// The parts of a node that content validation looks at.
trait ContentShape: Sized {
    fn text_value(&self) -> Option<&str>;
    fn child_nodes(&self) -> &[Self];
}

impl ContentShape for TreeNode {
    fn text_value(&self) -> Option<&str> {
        match self {
            TreeNode::Text { value } => Some(value),
            TreeNode::Element { .. } => None,
        }
    }

    fn child_nodes(&self) -> &[Self] {
        match self {
            TreeNode::Element { children, .. } => children,
            TreeNode::Text { .. } => &[],
        }
    }
}

impl ContentShape for TreeContent {
    fn text_value(&self) -> Option<&str> {
        match self {
            TreeContent::Text { value, .. } => Some(value),
            TreeContent::Element { .. } => None,
        }
    }

    fn child_nodes(&self) -> &[Self] {
        match self {
            TreeContent::Element { children, .. } => children,
            TreeContent::Text { .. } => &[],
        }
    }
}

fn validate<T: ContentShape>(nodes: &[T]) -> Result<(), TreeError> {
    let Some(first) = nodes.first() else {
        return Ok(());
    };
    let text = first.text_value().is_some();
    if nodes.iter().any(|node| node.text_value().is_some() != text) {
        return Err(TreeError::MixedContent);
    }
    nodes.iter().try_for_each(validate_values)
}

fn validate_values<T: ContentShape>(node: &T) -> Result<(), TreeError> {
    match node.text_value() {
        Some("") => Err(TreeError::EmptyTextNode),
        Some(_) => Ok(()),
        None => node.child_nodes().iter().try_for_each(validate_values),
    }
}

/// Checks that the top level of `nodes` is either all text or all elements, and that no text node
/// anywhere is empty.
pub(crate) fn validate_tree_nodes(nodes: &[TreeNode]) -> Result<(), TreeError> {
    validate(nodes)
}

/// [`validate_tree_nodes`] for stamped content.
pub(crate) fn validate_contents(contents: &[TreeContent]) -> Result<(), TreeError> {
    validate(contents)
}
