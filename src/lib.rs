// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Arbor: A Tree CRDT for Collaborative Rich-Text Editing
//!
//! This crate provides a replicated, ordered tree of elements and text that several replicas can
//! edit concurrently and independently. Replicas exchange the operations they produce, and every
//! replica converges to the same document regardless of the order in which operations arrive,
//! without any central coordination.
//!
//! A document looks like XML:
//!
//! ```text
//! <doc><p>Hello</p><p align="center">world</p></doc>
//! ```
//!
//! and supports the operations a rich-text editor needs: inserting and deleting ranges of
//! content, splitting an element in two (pressing enter in the middle of a paragraph), merging two
//! elements (pressing backspace at the start of one), and setting or removing attributes on
//! elements over a range.
//!
//! ## Core Concepts
//!
//! - [`Ticket`]: a logical timestamp `(lamport, delimiter, actor)`. Every node, removal and
//!   attribute write is stamped with one. Tickets are totally ordered, which makes every conflict
//!   resolution deterministic.
//! - [`VersionVector`]: the highest lamport observed from each actor. The pointwise minimum
//!   across all attached replicas tells when a tombstone can be garbage collected.
//! - [`IndexTree`](index_tree::IndexTree): the generic tree underneath. It converts between flat
//!   integer indices, paths and node positions, where every element occupies its content plus two
//!   units for its open and close tags.
//! - [`CrdtTree`]: the replicated tree. Nodes are identified by a [`TreeNodeId`] that never
//!   changes, and edits are addressed with [`CrdtTreePos`]itions that stay meaningful while other
//!   replicas concurrently insert or delete around them.
//!
//! ## Tombstones and Their Collection
//!
//! Deleting a node only marks it as removed. The node stays in the tree so that positions other
//! replicas computed before they observed the deletion still resolve. Once every replica has
//! observed the removal, [`CrdtTree::garbage_collect`] unlinks it for good.
//!
//! ## Concurrent Deletes
//!
//! An edit carries a [`MaxCreatedAtMap`]: for every actor, the newest node of that actor the
//! issuing replica could see in the edited range. When the edit is replayed elsewhere, nodes that
//! were inserted concurrently (and therefore are newer than that entry) survive the deletion.
//!
//! ## Getting Started
//!
//! ```rust
//! use arbor::{ActorId, LogicalClock, Tree, api::ChangeContext, tree_node};
//!
//! let mut alice_clock = LogicalClock::new(ActorId::new(1));
//! let mut alice = Tree::new(tree_node!(doc [p ["ab"]]));
//! {
//!     let mut ctx = ChangeContext::new(&mut alice_clock);
//!     alice.initialize(&mut ctx).unwrap();
//! }
//!
//! // Bob starts from a copy of Alice's document.
//! let mut bob_clock = LogicalClock::new(ActorId::new(2));
//! bob_clock.observe(alice_clock.lamport());
//! let mut bob = Tree::from_crdt(alice.crdt().unwrap().clone());
//!
//! // Concurrently, Alice splits the paragraph and Bob types into it.
//! let split = {
//!     let mut ctx = ChangeContext::new(&mut alice_clock);
//!     alice.edit(&mut ctx, 2, 2, &[], 1).unwrap()
//! };
//! let typed = {
//!     let mut ctx = ChangeContext::new(&mut bob_clock);
//!     bob.edit(&mut ctx, 2, 2, &[tree_node!("c")], 0).unwrap()
//! };
//!
//! split.execute(bob.crdt_mut().unwrap()).unwrap();
//! typed.execute(alice.crdt_mut().unwrap()).unwrap();
//!
//! assert_eq!(alice.to_xml().unwrap(), "<doc><p>ac</p><p>b</p></doc>");
//! assert_eq!(alice.to_xml(), bob.to_xml());
//! ```
//!
//! ## Scope of this Crate
//!
//! This crate is the tree itself. Batching changes into transactions, transporting operations
//! between replicas and tracking which replicas are attached are left to the layer above it. That
//! layer must deliver the operations of each actor in the order they were issued.
//!
//! ## Features
//!
//! - `json`: Enables conversion of trees to and from `serde_json::Value`. This feature is enabled
//!   by default.
//! - `serde`: Provides `serde` support for tickets, positions, node records and operations.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for tickets, actors and version vectors.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use ahash::RandomState;
use std::{
    hash::BuildHasher,
    sync::atomic::{AtomicBool, Ordering},
};

// Use a constant seed for hashing to make performance benchmarks have less variance.
pub(crate) const DETERMINISTIC_HASHER: RandomState = RandomState::with_seeds(48, 1516, 23, 42);

pub mod api;
pub use api::Tree;
pub mod attributes;
pub use attributes::AttributeRegister;
pub mod causal_context;
pub use causal_context::{
    ActorId, LogicalClock, MaxCreatedAtMap, Ticket, TicketIssuer, TicketSequence, VersionVector,
};
mod error;
pub use error::TreeError;
pub mod index_tree;
#[cfg(feature = "json")]
mod json;
/// Macros usable for tests and initialization
pub mod macros;
pub mod operation;
pub use operation::{TreeEditOperation, TreeOperation, TreeStyleOperation};
pub mod tree;
pub use tree::{CrdtTree, CrdtTreePos, TreeChange, TreeContent, TreeNode, TreeNodeId};

static ENABLE_DETERMINISM: AtomicBool = AtomicBool::new(false);

/// Makes all data structures behave deterministically.
///
/// This should only be enabled for testing, as it increases the odds of DoS
/// scenarios.
#[doc(hidden)]
pub fn enable_determinism() {
    ENABLE_DETERMINISM.store(true, Ordering::Release);
}

/// Checks if determinism is enabled.
///
/// Should be used internally and for testing.
#[doc(hidden)]
pub fn determinism_enabled() -> bool {
    ENABLE_DETERMINISM.load(Ordering::Acquire)
}

/// Create a random state for a hashmap.
/// If `enable_determinism` has been used, this will return a deterministic
/// decidedly non-random RandomState, useful in tests.
#[inline]
fn make_random_state() -> RandomState {
    if determinism_enabled() {
        DETERMINISTIC_HASHER
    } else {
        RandomState::new()
    }
}

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, ArborRandomState>;
pub(crate) type HashSet<T> = std::collections::HashSet<T, ArborRandomState>;

fn create_map<K, V>() -> HashMap<K, V> {
    HashMap::with_hasher(ArborRandomState::default())
}

fn create_set<T>() -> HashSet<T> {
    HashSet::with_hasher(ArborRandomState::default())
}

/// A small wrapper around [`ahash::RandomState`] that switches to a fixed seed once
/// [`enable_determinism`] has been called.
#[derive(Clone)]
pub struct ArborRandomState {
    inner: RandomState,
}

impl Default for ArborRandomState {
    #[inline]
    fn default() -> Self {
        Self {
            inner: make_random_state(),
        }
    }
}

impl BuildHasher for ArborRandomState {
    type Hasher = <RandomState as BuildHasher>::Hasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        self.inner.build_hasher()
    }
}
