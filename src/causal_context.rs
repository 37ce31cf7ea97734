// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Causal Context
//!
//! This module provides the causality primitives that every tree mutation is stamped with.
//!
//! - **[`ActorId`]**: A unique identifier for a replica (an actor) in the system.
//!
//! - **[`Ticket`]**: A logical timestamp `(lamport, delimiter, actor)`. Every node, removal and
//!   attribute write carries one. Tickets are totally ordered by lamport _first_, then actor,
//!   then delimiter, which makes every conflict resolution in this crate deterministic.
//!
//! - **[`VersionVector`]**: The highest lamport observed from each actor. It decides whether two
//!   operations are causally related or concurrent, and the pointwise minimum across all
//!   attached replicas drives garbage collection.
//!
//! - **[`LogicalClock`]** and **[`TicketSequence`]**: [`TicketIssuer`]s. The former issues tickets
//!   for local changes, the latter replays the exact same consecutive tickets when a remote
//!   operation is executed, so that nodes created as a side-effect of an operation (for example,
//!   the clone produced by splitting an element) get identical ids on every replica.
use std::{collections::BTreeMap, fmt};

mod version_vector;
pub use version_vector::VersionVector;

/// The identifier we use for actors (replicas) in the system.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[repr(transparent)]
pub struct ActorId(u32);

impl ActorId {
    /// The actor that stamps the initial state of a document.
    pub const INITIAL: ActorId = ActorId(0);

    /// The largest representable actor.
    pub const MAX: ActorId = ActorId(u32::MAX);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<u32> for ActorId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A logical timestamp that totally orders events within and across actors.
///
/// `lamport` is the Lamport clock value of the change the ticket was issued in, `delimiter`
/// distinguishes tickets issued within the same change, and `actor` is the replica that issued
/// it.
///
/// ```rust
/// # use arbor::{ActorId, Ticket};
/// let a = Ticket::new(1, 5, ActorId::new(2));
/// let b = Ticket::new(1, 1, ActorId::new(3));
/// let c = Ticket::new(2, 0, ActorId::new(1));
///
/// // lamport first, then actor, then delimiter
/// assert!(a < b);
/// assert!(b < c);
/// assert!(c.after(&a));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Ticket {
    lamport: u64,
    delimiter: u32,
    actor: ActorId,
}

impl Ticket {
    /// The ticket that stamps the initial state of every replica.
    pub const INITIAL: Ticket = Ticket::new(0, 0, ActorId::INITIAL);

    /// A ticket that is after every ticket that can ever be issued.
    ///
    /// Used as the removal threshold of local edits, which may remove anything they can see.
    pub const MAX: Ticket = Ticket::new(u64::MAX, u32::MAX, ActorId::MAX);

    pub const fn new(lamport: u64, delimiter: u32, actor: ActorId) -> Self {
        Self {
            lamport,
            delimiter,
            actor,
        }
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    pub fn delimiter(&self) -> u32 {
        self.delimiter
    }

    /// Returns the [`ActorId`] of the replica that issued this [`Ticket`].
    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Returns true if `self` is ordered strictly after `other`.
    pub fn after(&self, other: &Ticket) -> bool {
        self > other
    }

    /// Returns the ticket issued right after `self` within the same change.
    pub fn successor(&self) -> Ticket {
        Ticket::new(self.lamport, self.delimiter.wrapping_add(1), self.actor)
    }
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{:?}", self.lamport, self.delimiter, self.actor)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per actor, the greatest creation ticket of the nodes that an edit or style operation could see
/// in its target range when it was issued.
///
/// When the operation is replayed on another replica, a node is only affected if its creation
/// ticket is not after the entry of its creator. Nodes of actors that are absent from the map were
/// unknown to the issuing replica, so they are compared against [`Ticket::INITIAL`].
pub type MaxCreatedAtMap = BTreeMap<ActorId, Ticket>;

/// Records `created_at` in `map` if it is the greatest ticket seen for its actor.
pub(crate) fn record_created_at(map: &mut MaxCreatedAtMap, created_at: Ticket) {
    map.entry(created_at.actor())
        .and_modify(|max| {
            if created_at.after(max) {
                *max = created_at;
            }
        })
        .or_insert(created_at);
}

/// Returns the ticket a node created by `actor` is checked against when an operation carrying
/// `map` is executed. `None` stands for a local operation.
pub(crate) fn removal_threshold(map: Option<&MaxCreatedAtMap>, actor: ActorId) -> Ticket {
    match map {
        None => Ticket::MAX,
        Some(map) => map.get(&actor).copied().unwrap_or(Ticket::INITIAL),
    }
}

/// Something that hands out fresh [`Ticket`]s.
pub trait TicketIssuer {
    fn issue_ticket(&mut self) -> Ticket;
}

impl<F> TicketIssuer for F
where
    F: FnMut() -> Ticket,
{
    fn issue_ticket(&mut self) -> Ticket {
        self()
    }
}

/// The clock of a single actor.
///
/// Each change starts with [`LogicalClock::next_change`], which advances the Lamport clock; all
/// tickets issued until the next change share that lamport and have increasing delimiters.
///
/// ```rust
/// # use arbor::{ActorId, LogicalClock, TicketIssuer};
/// let mut clock = LogicalClock::new(ActorId::new(1));
/// clock.next_change();
/// let first = clock.issue_ticket();
/// let second = clock.issue_ticket();
/// assert_eq!(first.successor(), second);
///
/// // observing a remote change moves the next change past it
/// clock.observe(41);
/// clock.next_change();
/// assert_eq!(clock.issue_ticket().lamport(), 42);
/// ```
#[derive(Clone, Debug)]
pub struct LogicalClock {
    actor: ActorId,
    lamport: u64,
    delimiter: u32,
}

impl LogicalClock {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            lamport: 0,
            delimiter: 0,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    /// Starts a new change and returns its lamport.
    pub fn next_change(&mut self) -> u64 {
        self.lamport += 1;
        self.delimiter = 0;
        self.lamport
    }

    /// Takes a remote lamport into account so that the next change is ordered after it.
    pub fn observe(&mut self, lamport: u64) {
        self.lamport = self.lamport.max(lamport);
    }

    /// The most recently issued ticket of the current change.
    pub fn last_ticket(&self) -> Ticket {
        Ticket::new(self.lamport, self.delimiter, self.actor)
    }
}

impl TicketIssuer for LogicalClock {
    fn issue_ticket(&mut self) -> Ticket {
        self.delimiter += 1;
        self.last_ticket()
    }
}

/// Issues the tickets that follow a given ticket within the same change.
///
/// Used when replaying a remote operation: the issuing replica handed out the same consecutive
/// tickets from its [`LogicalClock`], so both sides derive identical ids.
#[derive(Clone, Copy, Debug)]
pub struct TicketSequence {
    last: Ticket,
}

impl TicketSequence {
    pub fn after(ticket: Ticket) -> Self {
        Self { last: ticket }
    }
}

impl TicketIssuer for TicketSequence {
    fn issue_ticket(&mut self) -> Ticket {
        self.last = self.last.successor();
        self.last
    }
}

#[cfg(any(test, feature = "arbitrary"))]
mod arbitrary {
    use super::*;
    use quickcheck::{Arbitrary, Gen};

    impl Arbitrary for ActorId {
        fn arbitrary(g: &mut Gen) -> Self {
            // Skew the distribution so that the same actor shows up repeatedly in a single test.
            let choices = [1, 1, 1, 2, 2, 3, u32::arbitrary(g).saturating_add(1)];
            Self(*g.choose(&choices).unwrap())
        }
    }

    impl Arbitrary for Ticket {
        fn arbitrary(g: &mut Gen) -> Self {
            // Interesting code paths happen when several lamports are close to each other.
            let lamports = [1, 1, 2, 2, 3, 4, u64::arbitrary(g) % 1024 + 1];
            let delimiters = [0, 1, 1, 2, u32::arbitrary(g) % 64];
            Ticket::new(
                *g.choose(&lamports).unwrap(),
                *g.choose(&delimiters).unwrap(),
                ActorId::arbitrary(g),
            )
        }
    }

    impl Arbitrary for VersionVector {
        fn arbitrary(g: &mut Gen) -> Self {
            let entries: Vec<(ActorId, u8)> = Arbitrary::arbitrary(g);
            entries
                .into_iter()
                .map(|(actor, lamport)| (actor, u64::from(lamport)))
                .collect()
        }
    }
}
