// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::tree::TreeNodeId;
use std::fmt;

/// Error returned by tree operations.
///
/// Every operation validates its input and resolves its positions before it mutates anything, so
/// a tree is left untouched when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// An index is past the end of the addressed node.
    IndexOutOfRange { index: usize, size: usize },

    /// A range whose start lies after its end.
    InvalidRange { from: usize, to: usize },

    /// A path that does not address a position in the tree.
    InvalidPath(Vec<usize>),

    /// A path with no elements.
    EmptyPath,

    /// `from` and `to` paths of a range have different lengths.
    PathLengthMismatch { from: usize, to: usize },

    /// Text nodes must have a non-empty value.
    EmptyTextNode,

    /// Text and element nodes cannot be inserted side by side by a single edit.
    MixedContent,

    /// The tree handle has not been bound to a change context yet.
    Uninitialized,

    /// A node referenced by a position or an operation does not exist on this replica.
    ///
    /// This indicates a causality violation upstream and must not be ignored.
    NodeNotFound(TreeNodeId),

    /// Content or node records that do not describe a well-formed tree.
    MalformedTree(&'static str),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::IndexOutOfRange { index, size } => {
                write!(f, "index {index} is out of range (size {size})")
            }
            TreeError::InvalidRange { from, to } => {
                write!(f, "range start {from} is after its end {to}")
            }
            TreeError::InvalidPath(path) => write!(f, "unacceptable path {path:?}"),
            TreeError::EmptyPath => write!(f, "path must not be empty"),
            TreeError::PathLengthMismatch { from, to } => {
                write!(f, "path lengths differ: from has {from} elements, to has {to}")
            }
            TreeError::EmptyTextNode => write!(f, "text node cannot have empty value"),
            TreeError::MixedContent => {
                write!(f, "element node and text node cannot be passed together")
            }
            TreeError::Uninitialized => write!(f, "tree is not initialized yet"),
            TreeError::NodeNotFound(id) => write!(f, "node {id:?} not found"),
            TreeError::MalformedTree(reason) => write!(f, "malformed tree: {reason}"),
        }
    }
}

impl std::error::Error for TreeError {}
