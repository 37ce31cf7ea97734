// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{ActorId, Ticket};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, btree_map::Entry},
    fmt,
};

/// Tracks the highest lamport observed from each actor in the system.
///
/// Entries are never zero: an actor that has not been observed is simply absent, which keeps
/// equality and the causal ordering consistent with each other.
///
/// ```rust
/// # use arbor::{ActorId, Ticket, VersionVector};
/// let (a, b) = (ActorId::new(1), ActorId::new(2));
/// let mut left = VersionVector::from_iter([(a, 3), (b, 1)]);
/// let right = VersionVector::from_iter([(a, 2), (b, 4)]);
///
/// // neither has observed everything the other has
/// assert_eq!(left.partial_cmp(&right), None);
///
/// // the pointwise minimum is what every replica has seen
/// let synced = left.min(&right);
/// assert!(synced.after_or_equal(&Ticket::new(2, 0, a)));
/// assert!(!synced.after_or_equal(&Ticket::new(3, 0, a)));
///
/// left.max(&right);
/// assert_eq!(left.get(b), 4);
/// ```
#[derive(Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct VersionVector {
    lamports: BTreeMap<ActorId, u64>,
}

impl fmt::Debug for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VersionVector").field(&self.lamports).finish()
    }
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the highest lamport observed from `actor`, or 0 if the actor is unknown.
    pub fn get(&self, actor: ActorId) -> u64 {
        self.lamports.get(&actor).copied().unwrap_or(0)
    }

    /// Overwrites the entry of `actor`.
    pub fn set(&mut self, actor: ActorId, lamport: u64) {
        if lamport == 0 {
            self.lamports.remove(&actor);
        } else {
            self.lamports.insert(actor, lamport);
        }
    }

    /// Raises the entry of `actor` to `lamport` if it is lower.
    pub fn observe(&mut self, actor: ActorId, lamport: u64) {
        if lamport == 0 {
            return;
        }
        match self.lamports.entry(actor) {
            Entry::Vacant(v) => {
                v.insert(lamport);
            }
            Entry::Occupied(mut o) => {
                let known = o.get_mut();
                *known = (*known).max(lamport);
            }
        }
    }

    /// Forgets everything observed from `actor`, for example when a replica detaches.
    pub fn unset(&mut self, actor: ActorId) {
        self.lamports.remove(&actor);
    }

    pub fn len(&self) -> usize {
        self.lamports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lamports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActorId, u64)> + '_ {
        self.lamports.iter().map(|(actor, lamport)| (*actor, *lamport))
    }

    /// Incorporates the observations of `other` into `self` (pointwise maximum).
    pub fn max(&mut self, other: &VersionVector) {
        for (actor, lamport) in other.iter() {
            self.observe(actor, lamport);
        }
    }

    /// Returns the pointwise minimum of `self` and `other`.
    ///
    /// An actor missing on either side counts as 0 and is therefore absent from the result.
    pub fn min(&self, other: &VersionVector) -> VersionVector {
        let lamports = self
            .lamports
            .iter()
            .filter_map(|(actor, lamport)| {
                other
                    .lamports
                    .get(actor)
                    .map(|theirs| (*actor, (*lamport).min(*theirs)))
            })
            .collect();
        Self { lamports }
    }

    /// Returns the pointwise minimum across all `vectors`, or an empty vector if there are none.
    ///
    /// This is the `minSyncedVersionVector` that garbage collection is driven by.
    pub fn min_of<'a>(vectors: impl IntoIterator<Item = &'a VersionVector>) -> VersionVector {
        let mut vectors = vectors.into_iter();
        let Some(first) = vectors.next() else {
            return VersionVector::new();
        };
        vectors.fold(first.clone(), |acc, vv| acc.min(vv))
    }

    /// Returns true if the event stamped with `ticket` has been observed, that is, if it
    /// happened-before or is equal to the state this vector describes.
    pub fn after_or_equal(&self, ticket: &Ticket) -> bool {
        self.get(ticket.actor()) >= ticket.lamport()
    }

    /// The greatest lamport across all actors.
    pub fn max_lamport(&self) -> u64 {
        self.lamports.values().copied().max().unwrap_or(0)
    }

    /// The smallest lamport across all known actors.
    pub fn min_lamport(&self) -> u64 {
        self.lamports.values().copied().min().unwrap_or(0)
    }

    /// Returns true if `self` has observed everything `other` has, and at least one more event.
    pub fn after(&self, other: &VersionVector) -> bool {
        self.partial_cmp(other) == Some(Ordering::Greater)
    }

    /// Returns true if `self` and `other` each observed events the other has not.
    pub fn concurrent_with(&self, other: &VersionVector) -> bool {
        self.partial_cmp(other).is_none()
    }
}

/// The happens-before ordering of two vectors; `None` when they are concurrent.
impl PartialOrd for VersionVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let mut order = Ordering::Equal;
        let mut update = |ours: u64, theirs: u64| -> bool {
            match ours.cmp(&theirs) {
                Ordering::Equal => true,
                cmp if order == Ordering::Equal || order == cmp => {
                    order = cmp;
                    true
                }
                _ => false,
            }
        };

        for (actor, lamport) in self.iter() {
            if !update(lamport, other.get(actor)) {
                return None;
            }
        }
        for (actor, lamport) in other.iter() {
            if !update(self.get(actor), lamport) {
                return None;
            }
        }
        Some(order)
    }
}

impl FromIterator<(ActorId, u64)> for VersionVector {
    fn from_iter<T: IntoIterator<Item = (ActorId, u64)>>(iter: T) -> Self {
        let mut vv = Self::new();
        vv.extend(iter);
        vv
    }
}

impl Extend<(ActorId, u64)> for VersionVector {
    fn extend<T: IntoIterator<Item = (ActorId, u64)>>(&mut self, iter: T) {
        for (actor, lamport) in iter {
            self.observe(actor, lamport);
        }
    }
}
