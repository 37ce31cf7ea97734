// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! JSON representation
//!
//! Elements become objects with a `type`, their `children` and, if they have any, their
//! `attributes`. Text becomes an object of type `text` with a `value`. Only the live document is
//! represented; tombstones and ids are left out.
//!
//! # Examples
//!
//! `<doc><p align="center">hi</p></doc>` is represented as
//!
//! ```json
//! {
//!   "type": "doc",
//!   "children": [
//!     {
//!       "type": "p",
//!       "children": [{ "type": "text", "value": "hi" }],
//!       "attributes": { "align": "center" }
//!     }
//!   ]
//! }
//! ```
use crate::{
    TreeError,
    tree::{CrdtTree, TEXT_TAG, TreeNode},
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Converts a [`TreeNode`] to a [`serde_json::Value`].
impl From<&TreeNode> for Value {
    fn from(node: &TreeNode) -> Self {
        let mut object = Map::new();
        match node {
            TreeNode::Text { value } => {
                object.insert("type".into(), TEXT_TAG.into());
                object.insert("value".into(), value.as_str().into());
            }
            TreeNode::Element {
                tag,
                attributes,
                children,
            } => {
                object.insert("type".into(), tag.as_str().into());
                object.insert(
                    "children".into(),
                    Value::Array(children.iter().map(Value::from).collect()),
                );
                if !attributes.is_empty() {
                    let attributes = attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                        .collect();
                    object.insert("attributes".into(), Value::Object(attributes));
                }
            }
        }
        Value::Object(object)
    }
}

impl TreeNode {
    pub fn to_json(&self) -> Value {
        self.into()
    }

    /// Reads a node from the representation produced by [`TreeNode::to_json`].
    ///
    /// Attribute values that are not strings are kept as their JSON text.
    pub fn from_json(value: &Value) -> Result<Self, TreeError> {
        let Value::Object(object) = value else {
            return Err(TreeError::MalformedTree("a node must be a JSON object"));
        };
        let Some(tag) = object.get("type").and_then(Value::as_str) else {
            return Err(TreeError::MalformedTree("a node needs a string type"));
        };

        if tag == TEXT_TAG {
            let Some(value) = object.get("value").and_then(Value::as_str) else {
                return Err(TreeError::MalformedTree("text needs a string value"));
            };
            return Ok(TreeNode::text(value));
        }

        let children = match object.get("children") {
            None => Vec::new(),
            Some(Value::Array(children)) => children
                .iter()
                .map(TreeNode::from_json)
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(TreeError::MalformedTree("children must be an array")),
        };
        let attributes = match object.get("attributes") {
            None => BTreeMap::new(),
            Some(Value::Object(attributes)) => attributes
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
            Some(_) => return Err(TreeError::MalformedTree("attributes must be an object")),
        };
        Ok(TreeNode::Element {
            tag: tag.to_string(),
            attributes,
            children,
        })
    }
}

impl CrdtTree {
    /// The live document as JSON.
    pub fn to_json(&self) -> Value {
        Value::from(&self.to_tree_node())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_node;

    #[test]
    fn nodes_to_json() {
        let node = tree_node!(doc [p { align: "center" } ["hi"], p []]);
        insta::assert_snapshot!(
            node.to_json().to_string(),
            @r#"{"children":[{"attributes":{"align":"center"},"children":[{"type":"text","value":"hi"}],"type":"p"},{"children":[],"type":"p"}],"type":"doc"}"#
        );
    }

    #[test]
    fn json_reads_back() {
        let node = tree_node!(doc [p { align: "center" } ["hi"], ul [li ["a"]]]);
        assert_eq!(TreeNode::from_json(&node.to_json()), Ok(node));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = TreeNode::from_json(&serde_json::json!({ "type": "text" })).unwrap_err();
        assert_eq!(err, TreeError::MalformedTree("text needs a string value"));
        let err = TreeNode::from_json(&serde_json::json!(["p"])).unwrap_err();
        assert_eq!(err, TreeError::MalformedTree("a node must be a JSON object"));
    }
}
