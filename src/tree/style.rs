// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{
    CrdtTree, CrdtTreePos, DataSize, GcPair, StyleResult, TreeChange, TreeChangeKind,
    TreeChangeValue,
    view::{View, ViewToken},
};
use crate::{
    MaxCreatedAtMap, Ticket, TreeError, causal_context::record_created_at, create_set,
    index_tree::{NodeKey, TreePos},
};
use std::collections::BTreeMap;

impl CrdtTree {
    /// Sets `attributes` on every element that has a tag inside `from..to`.
    ///
    /// Text is never styled. With `max_created_at_map`, elements that the issuer could not have
    /// seen are skipped. Removed elements are skipped unless the issuer did not know about the
    /// removal, so a style and a concurrent delete leave the same tombstone in either order. Each
    /// attribute is a last-writer-wins register, so only writes newer than the current value take
    /// effect.
    pub fn style(
        &mut self,
        (from, to): (&CrdtTreePos, &CrdtTreePos),
        attributes: &BTreeMap<String, String>,
        edited_at: Ticket,
        max_created_at_map: Option<&MaxCreatedAtMap>,
    ) -> Result<StyleResult, TreeError> {
        let mut result = StyleResult::default();
        let elements = self.styled_elements(
            (from, to),
            edited_at,
            max_created_at_map,
            &mut result.max_created_at_map,
        )?;
        for key in elements {
            let visible = self.is_live(key);
            let node = self.nodes.get_mut(key);
            let affected: BTreeMap<String, String> = attributes
                .iter()
                .filter(|(name, value)| node.attributes.set(name, value, edited_at))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            if affected.is_empty() || !visible {
                continue;
            }
            result.changes.push(self.style_change(
                key,
                TreeChangeKind::Style,
                edited_at,
                TreeChangeValue::Attributes(affected),
            ));
        }

        tracing::debug!(
            actor = %edited_at.actor(),
            lamport = edited_at.lamport(),
            styled = result.changes.len(),
            "styled tree"
        );
        Ok(result)
    }

    /// Removes the attributes named by `keys` from every element that has a tag inside
    /// `from..to`.
    ///
    /// A removal leaves a tombstone in the register, reported as a [`GcPair::Attribute`].
    pub fn remove_style(
        &mut self,
        (from, to): (&CrdtTreePos, &CrdtTreePos),
        keys: &[String],
        edited_at: Ticket,
        max_created_at_map: Option<&MaxCreatedAtMap>,
    ) -> Result<StyleResult, TreeError> {
        let mut result = StyleResult::default();
        let elements = self.styled_elements(
            (from, to),
            edited_at,
            max_created_at_map,
            &mut result.max_created_at_map,
        )?;
        for key in elements {
            let visible = self.is_live(key);
            let node = self.nodes.get_mut(key);
            let id = node.id;
            let removed: Vec<String> = keys
                .iter()
                .filter(|name| node.attributes.remove(name, edited_at))
                .cloned()
                .collect();
            if removed.is_empty() {
                continue;
            }
            result
                .gc_pairs
                .extend(removed.iter().map(|name| GcPair::Attribute {
                    node: id,
                    key: name.clone(),
                    removed_at: edited_at,
                }));
            if !visible {
                continue;
            }
            result.changes.push(self.style_change(
                key,
                TreeChangeKind::RemoveStyle,
                edited_at,
                TreeChangeValue::AttributeKeys(removed),
            ));
        }

        tracing::debug!(
            actor = %edited_at.actor(),
            lamport = edited_at.lamport(),
            styled = result.changes.len(),
            tombstones = result.gc_pairs.len(),
            "removed style from tree"
        );
        Ok(result)
    }

    /// The elements a style over `from..to` applies to, in document order.
    ///
    /// Records in `seen` the elements in range and, for a local style, the removals it saw, so
    /// that a replica receiving the style can tell them from concurrent ones.
    fn styled_elements(
        &mut self,
        (from, to): (&CrdtTreePos, &CrdtTreePos),
        edited_at: Ticket,
        max_created_at_map: Option<&MaxCreatedAtMap>,
        seen: &mut MaxCreatedAtMap,
    ) -> Result<Vec<NodeKey>, TreeError> {
        let mut view = View::new(self, max_created_at_map, edited_at);
        let from_anchor = self.anchor(&view, from)?;
        let to_anchor = self.anchor(&view, to)?;
        if self.gap_key(&view, &from_anchor) > self.gap_key(&view, &to_anchor) {
            if max_created_at_map.is_some() {
                // turned around by concurrent merges: nothing in between
                return Ok(Vec::new());
            }
            return Err(TreeError::InvalidRange {
                from: self.anchor_index(&from_anchor),
                to: self.anchor_index(&to_anchor),
            });
        }

        // splitting text at the boundaries keeps the token ranges exact
        let mut unused = DataSize::default();
        let (from_parent, from_left) = self.settle(&from_anchor, &mut view, &mut unused);
        let to_anchor = self.anchor(&view, to)?;
        let (to_parent, to_left) = self.settle(&to_anchor, &mut view, &mut unused);

        let mut visited = create_set();
        let mut elements = Vec::new();
        for token in view.tokens(self, (from_parent, from_left), (to_parent, to_left)) {
            let key = token.node();
            if matches!(token, ViewToken::Text(_)) || !visited.insert(key) {
                continue;
            }
            if !view.known(self, key) {
                continue;
            }
            record_created_at(seen, self.created_at(key));
            match self.node(key).removed_at {
                None => elements.push(key),
                Some(removed_at) if max_created_at_map.is_none() => {
                    record_created_at(seen, removed_at);
                }
                Some(removed_at) => {
                    if !view.seen(removed_at) {
                        elements.push(key);
                    }
                }
            }
        }
        Ok(elements)
    }

    /// The change for styling `key`: the range of its start tag.
    fn style_change(
        &self,
        key: NodeKey,
        kind: TreeChangeKind,
        edited_at: Ticket,
        value: TreeChangeValue,
    ) -> TreeChange {
        let (from, from_path) = match self.nodes.parent(key) {
            Some(parent) => {
                let pos = TreePos {
                    node: parent,
                    offset: self.nodes.find_offset(parent, key),
                };
                (self.nodes.index_of(pos), self.nodes.tree_pos_to_path(pos))
            }
            None => (0, Vec::new()),
        };
        let to_path = self
            .nodes
            .tree_pos_to_path(TreePos { node: key, offset: 0 });
        TreeChange {
            kind,
            from,
            to: from + 1,
            from_path,
            to_path,
            actor: edited_at.actor(),
            value: Some(value),
            split_level: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActorId, TicketSequence, tree::tests::tree_from, tree_node};

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ticket(lamport: u64, actor: u32) -> Ticket {
        Ticket::new(lamport, 0, ActorId::new(actor))
    }

    #[test]
    fn style_elements_in_range() {
        let mut tree = tree_from(tree_node!(root [p ["ab"], p ["cd"]]));
        let (from, to) = tree.index_range_to_pos_range((0, 5)).unwrap();
        let result = tree
            .style((&from, &to), &attrs(&[("bold", "true")]), ticket(2, 1), None)
            .unwrap();
        insta::assert_snapshot!(
            tree.to_xml(),
            @r#"<root><p bold="true">ab</p><p bold="true">cd</p></root>"#
        );
        let ranges: Vec<_> = result.changes.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(ranges, vec![(0, 1), (4, 5)]);
        assert_eq!(result.changes[1].from_path, vec![1]);
        assert_eq!(result.changes[1].to_path, vec![1, 0]);
        assert_eq!(result.max_created_at_map.len(), 1);
    }

    #[test]
    fn text_only_ranges_style_nothing() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let (from, to) = tree.index_range_to_pos_range((2, 4)).unwrap();
        let result = tree
            .style((&from, &to), &attrs(&[("x", "1")]), ticket(2, 1), None)
            .unwrap();
        assert!(result.changes.is_empty());
        assert_eq!(tree.to_xml(), "<root><p>abcd</p></root>");
    }

    #[test]
    fn older_writes_lose() {
        let mut tree = tree_from(tree_node!(root [p { c: "a" } []]));
        let (from, to) = tree.index_range_to_pos_range((0, 1)).unwrap();
        tree.style((&from, &to), &attrs(&[("c", "q")]), ticket(3, 2), None)
            .unwrap();
        let result = tree
            .style((&from, &to), &attrs(&[("c", "d")]), ticket(3, 1), None)
            .unwrap();
        assert!(result.changes.is_empty());
        assert_eq!(tree.to_xml(), r#"<root><p c="q"></p></root>"#);
    }

    #[test]
    fn unknown_elements_are_not_styled() {
        let mut tree = tree_from(tree_node!(root [p [], i []]));
        let (from, to) = tree.index_range_to_pos_range((0, 4)).unwrap();
        // the issuer only knew the root and the first paragraph
        let map = MaxCreatedAtMap::from([(ActorId::new(1), Ticket::new(1, 2, ActorId::new(1)))]);
        tree.style((&from, &to), &attrs(&[("k", "v")]), ticket(2, 2), Some(&map))
            .unwrap();
        assert_eq!(tree.to_xml(), r#"<root><p k="v"></p><i></i></root>"#);
    }

    #[test]
    fn remove_style_leaves_tombstones() {
        let mut tree = tree_from(tree_node!(root [p { a: "1", b: "2" } []]));
        let (from, to) = tree.index_range_to_pos_range((0, 1)).unwrap();
        let keys = vec!["a".to_string(), "missing".to_string()];
        let result = tree
            .remove_style((&from, &to), &keys, ticket(2, 1), None)
            .unwrap();
        assert_eq!(tree.to_xml(), r#"<root><p b="2"></p></root>"#);
        assert_eq!(result.gc_pairs.len(), 2);
        assert_eq!(
            result.changes[0].value,
            Some(TreeChangeValue::AttributeKeys(keys.clone()))
        );

        // a concurrent older set does not bring the key back
        tree.style((&from, &to), &attrs(&[("a", "3")]), ticket(1, 9), None)
            .unwrap();
        assert_eq!(tree.to_xml(), r#"<root><p b="2"></p></root>"#);
        let p = tree.index_tree().all_children(tree.index_tree().root())[0];
        assert_eq!(tree.index_tree().get(p).attributes().tombstone_count(), 2);
    }

    #[test]
    fn removed_elements_take_only_concurrent_styles() {
        let mut tree = tree_from(tree_node!(root [p []]));
        let p_id = tree.first_element_id();
        let (from, to) = tree.index_range_to_pos_range((0, 2)).unwrap();
        let removed_at = ticket(2, 1);
        tree.edit((&from, &to), vec![], 0, removed_at, None, &mut TicketSequence::after(removed_at))
            .unwrap();

        // the issuer knew the paragraph but not its removal
        let before_removal =
            MaxCreatedAtMap::from([(ActorId::new(1), Ticket::new(1, 9, ActorId::new(1)))]);
        let result = tree
            .style((&from, &to), &attrs(&[("c", "d")]), ticket(2, 2), Some(&before_removal))
            .unwrap();
        assert!(result.changes.is_empty());
        assert_eq!(tree.get(&p_id).unwrap().attributes().get("c"), Some("d"));

        // a style issued after the removal leaves the tombstone alone
        let after_removal =
            MaxCreatedAtMap::from([(ActorId::new(1), Ticket::new(2, 9, ActorId::new(1)))]);
        tree.style((&from, &to), &attrs(&[("c", "q")]), ticket(3, 2), Some(&after_removal))
            .unwrap();
        assert_eq!(tree.get(&p_id).unwrap().attributes().get("c"), Some("d"));
        assert_eq!(tree.to_xml(), "<root></root>");
    }

    #[test]
    fn local_style_records_the_removals_it_saw() {
        let mut tree = tree_from(tree_node!(root [p [], i []]));
        let removed_at = ticket(2, 1);
        let (from, to) = tree.index_range_to_pos_range((0, 2)).unwrap();
        tree.edit((&from, &to), vec![], 0, removed_at, None, &mut TicketSequence::after(removed_at))
            .unwrap();
        let p_id = tree.first_element_id();

        let (from, to) = tree.index_range_to_pos_range((0, 2)).unwrap();
        let result = tree
            .style((&from, &to), &attrs(&[("k", "v")]), ticket(3, 1), None)
            .unwrap();
        assert_eq!(tree.to_xml(), r#"<root><i k="v"></i></root>"#);
        assert_eq!(tree.get(&p_id).unwrap().attributes().get("k"), None);
        assert_eq!(result.max_created_at_map[&ActorId::new(1)], removed_at);
    }

    #[test]
    fn reversed_range_is_rejected_before_splitting() {
        let mut tree = tree_from(tree_node!(root [p ["abcd"]]));
        let from = tree.find_pos(4).unwrap();
        let to = tree.find_pos(2).unwrap();
        let before = tree.to_node_records();
        assert_eq!(
            tree.style((&from, &to), &attrs(&[("k", "v")]), ticket(2, 1), None)
                .unwrap_err(),
            TreeError::InvalidRange { from: 4, to: 2 }
        );
        assert_eq!(tree.to_node_records(), before);
    }

    impl CrdtTree {
        fn first_element_id(&self) -> crate::TreeNodeId {
            let first = self.index_tree().all_children(self.index_tree().root())[0];
            self.index_tree().get(first).id()
        }
    }
}
