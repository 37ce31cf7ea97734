// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::CrdtTree;
use crate::{VersionVector, index_tree::NodeKey};

impl CrdtTree {
    /// Physically drops tombstones that every replica has observed.
    ///
    /// A tombstoned node is dropped once `min_synced` covers its removal, together with its whole
    /// subtree, but only if every node in that subtree is such a tombstone. Removed attributes
    /// covered by `min_synced` are dropped as well.
    ///
    /// Returns the number of nodes and attributes dropped.
    pub fn garbage_collect(&mut self, min_synced: &VersionVector) -> usize {
        let mut doomed = Vec::new();
        self.find_collectable(self.nodes.root(), min_synced, &mut doomed);

        let mut purged = 0;
        for top in doomed {
            for key in self.nodes.descendants(top) {
                self.unlink_lineage(key);
                let id = self.node(key).id;
                self.unregister(&id);
            }
            purged += self.nodes.free(top);
        }

        let mut attributes = 0;
        for key in self.nodes.descendants(self.nodes.root()) {
            attributes += self
                .nodes
                .get_mut(key)
                .attributes
                .purge(|removed_at| min_synced.after_or_equal(removed_at));
        }

        tracing::debug!(nodes = purged, attributes, "collected garbage");
        purged + attributes
    }

    /// Collects the topmost collectable subtrees below `key` into `doomed` and returns whether
    /// `key` itself is collectable.
    fn find_collectable(
        &self,
        key: NodeKey,
        min_synced: &VersionVector,
        doomed: &mut Vec<NodeKey>,
    ) -> bool {
        let mut collectable_children = Vec::new();
        let mut all_collectable = true;
        for child in self.nodes.all_children(key) {
            if self.find_collectable(*child, min_synced, doomed) {
                collectable_children.push(*child);
            } else {
                all_collectable = false;
            }
        }

        let collectable = key != self.nodes.root()
            && self
                .node(key)
                .removed_at
                .is_some_and(|removed_at| min_synced.after_or_equal(&removed_at));
        if collectable && all_collectable {
            return true;
        }
        doomed.extend(collectable_children);
        false
    }

    /// Removes `key` from the split lineage it belongs to.
    fn unlink_lineage(&mut self, key: NodeKey) {
        let node = self.node(key);
        let (prev, next) = (node.ins_prev, node.ins_next);
        if let Some(prev) = prev.and_then(|prev| self.key_of(&prev)) {
            self.nodes.get_mut(prev).ins_next = next;
        }
        if let Some(next) = next.and_then(|next| self.key_of(&next)) {
            self.nodes.get_mut(next).ins_prev = prev;
        }
    }
}
