// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Per-node attribute storage.
//!
//! Every key of an [`AttributeRegister`] is a last-writer-wins register ordered by [`Ticket`]. A
//! removal is itself a write (a tombstone), so that a concurrent set with an older ticket cannot
//! bring the key back while one with a newer ticket can.
use crate::{HashMap, Ticket, create_map};
use std::{collections::BTreeMap, mem};

/// The latest write to a single attribute key.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Attribute {
    pub value: String,
    pub updated_at: Ticket,
    pub removed: bool,
}

impl Attribute {
    /// The ticket of the removal, if this attribute is a tombstone.
    pub fn removed_at(&self) -> Option<Ticket> {
        self.removed.then_some(self.updated_at)
    }
}

/// A map of attribute registers, including the tombstones of removed keys.
#[derive(Clone, Default)]
pub struct AttributeRegister {
    entries: HashMap<String, Attribute>,
}

impl PartialEq for AttributeRegister {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for AttributeRegister {}

impl std::fmt::Debug for AttributeRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.sorted()).finish()
    }
}

impl AttributeRegister {
    pub fn new() -> Self {
        Self {
            entries: create_map(),
        }
    }

    /// Builds a register where every attribute was written at `updated_at`.
    pub fn from_values<'a>(
        values: impl IntoIterator<Item = (&'a String, &'a String)>,
        updated_at: Ticket,
    ) -> Self {
        let mut register = Self::new();
        for (key, value) in values {
            register.set(key, value, updated_at);
        }
        register
    }

    /// Writes `value` to `key` if `updated_at` is after the last write to it.
    ///
    /// Returns true if the write took effect.
    pub fn set(&mut self, key: &str, value: &str, updated_at: Ticket) -> bool {
        if let Some(existing) = self.entries.get(key) {
            if !updated_at.after(&existing.updated_at) {
                return false;
            }
        }
        self.entries.insert(
            key.to_string(),
            Attribute {
                value: value.to_string(),
                updated_at,
                removed: false,
            },
        );
        true
    }

    /// Writes a tombstone to `key` if `removed_at` is after the last write to it.
    ///
    /// Returns true if the tombstone was written. A key that was never set still receives a
    /// tombstone, so that a concurrent older set does not win.
    pub fn remove(&mut self, key: &str, removed_at: Ticket) -> bool {
        match self.entries.get_mut(key) {
            Some(existing) if !removed_at.after(&existing.updated_at) => false,
            Some(existing) => {
                existing.updated_at = removed_at;
                existing.removed = true;
                true
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    Attribute {
                        value: String::new(),
                        updated_at: removed_at,
                        removed: true,
                    },
                );
                true
            }
        }
    }

    /// Inserts an entry as-is, bypassing the last-writer-wins check.
    pub(crate) fn restore(&mut self, key: String, attribute: Attribute) {
        self.entries.insert(key, attribute);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|attribute| !attribute.removed)
            .map(|attribute| attribute.value.as_str())
    }

    /// The entry of `key`, tombstone or not.
    pub fn entry(&self, key: &str) -> Option<&Attribute> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The live attributes, ordered by key.
    pub fn values(&self) -> BTreeMap<&str, &str> {
        self.entries
            .iter()
            .filter(|(_, attribute)| !attribute.removed)
            .map(|(key, attribute)| (key.as_str(), attribute.value.as_str()))
            .collect()
    }

    /// All entries including tombstones, ordered by key.
    pub fn sorted(&self) -> Vec<(&String, &Attribute)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// The number of live attributes.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|a| !a.removed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of tombstones.
    pub fn tombstone_count(&self) -> usize {
        self.entries.values().filter(|a| a.removed).count()
    }

    /// Drops every tombstone whose removal `is_collectable` and returns how many were dropped.
    pub fn purge(&mut self, mut is_collectable: impl FnMut(&Ticket) -> bool) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, attribute| !(attribute.removed && is_collectable(&attribute.updated_at)));
        before - self.entries.len()
    }

    /// `(data, meta)`: the bytes of the live keys and values, and the size of the tickets kept for
    /// every entry.
    pub(crate) fn data_size(&self) -> (usize, usize) {
        self.entries
            .iter()
            .fold((0, 0), |(data, meta), (key, attribute)| {
                let data = if attribute.removed {
                    data
                } else {
                    data + key.len() + attribute.value.len()
                };
                (data, meta + mem::size_of::<Ticket>())
            })
    }

    /// ` key="value"` for every live attribute, ordered by key.
    pub(crate) fn to_xml(&self) -> String {
        self.values()
            .into_iter()
            .map(|(key, value)| format!(" {key}=\"{value}\""))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActorId;
    use quickcheck::TestResult;

    fn at(lamport: u64, actor: u32) -> Ticket {
        Ticket::new(lamport, 0, ActorId::new(actor))
    }

    #[quickcheck]
    fn concurrent_sets_converge(a: Ticket, b: Ticket) -> TestResult {
        if a == b {
            return TestResult::discard();
        }
        let mut left = AttributeRegister::new();
        left.set("k", "a", a);
        left.set("k", "b", b);
        let mut right = AttributeRegister::new();
        right.set("k", "b", b);
        right.set("k", "a", a);
        TestResult::from_bool(left == right)
    }

    #[test]
    fn newer_write_wins() {
        let mut register = AttributeRegister::new();
        assert!(register.set("c", "d", at(2, 1)));
        assert!(!register.set("c", "x", at(1, 9)));
        assert!(register.set("c", "q", at(2, 2)));
        assert_eq!(register.get("c"), Some("q"));
    }

    #[test]
    fn removal_is_a_write() {
        let mut register = AttributeRegister::new();
        register.set("bold", "true", at(1, 1));
        assert!(register.remove("bold", at(3, 1)));
        assert!(!register.set("bold", "false", at(2, 2)));
        assert_eq!(register.get("bold"), None);
        assert!(register.set("bold", "again", at(4, 2)));
        assert_eq!(register.get("bold"), Some("again"));
    }

    #[test]
    fn removing_an_unknown_key_leaves_a_tombstone() {
        let mut register = AttributeRegister::new();
        assert!(register.remove("italic", at(5, 1)));
        assert!(!register.set("italic", "true", at(4, 2)));
        assert!(register.is_empty());
        assert_eq!(register.tombstone_count(), 1);
    }

    #[test]
    fn purge_only_drops_collectable_tombstones() {
        let mut register = AttributeRegister::new();
        register.set("a", "1", at(1, 1));
        register.remove("b", at(2, 1));
        register.remove("c", at(6, 1));
        let purged = register.purge(|ticket| ticket.lamport() <= 4);
        assert_eq!(purged, 1);
        assert!(register.entry("b").is_none());
        assert!(register.entry("c").is_some());
        assert_eq!(register.get("a"), Some("1"));
    }

    #[test]
    fn xml_is_ordered_by_key() {
        let mut register = AttributeRegister::new();
        register.set("z", "1", at(1, 1));
        register.set("a", "2", at(1, 1));
        register.remove("m", at(1, 1));
        assert_eq!(register.to_xml(), r#" a="2" z="1""#);
    }
}
