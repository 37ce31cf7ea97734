#![allow(dead_code)]

use arbor::{
    ActorId, LogicalClock, Tree, TreeNode, TreeOperation, VersionVector, api::ChangeContext,
};
use std::{collections::BTreeMap, sync::Once};

/// Routes `tracing` output to the test harness. Set `RUST_LOG=arbor=trace` to see it.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One copy of a document together with the clock and version vector of its actor.
pub struct Replica {
    pub clock: LogicalClock,
    pub tree: Tree,
    /// The highest lamport this replica has seen from every actor, itself included.
    pub seen: VersionVector,
}

impl Replica {
    fn record_local(&mut self) {
        self.seen.observe(self.clock.actor(), self.clock.lamport());
    }

    pub fn edit(
        &mut self,
        from: usize,
        to: usize,
        contents: &[TreeNode],
        split_level: u32,
    ) -> TreeOperation {
        let op = {
            let mut ctx = ChangeContext::new(&mut self.clock);
            self.tree
                .edit(&mut ctx, from, to, contents, split_level)
                .expect("local edit")
        };
        self.record_local();
        op.into()
    }

    pub fn delete(&mut self, from: usize, to: usize) -> TreeOperation {
        self.edit(from, to, &[], 0)
    }

    pub fn insert(&mut self, at: usize, contents: &[TreeNode]) -> TreeOperation {
        self.edit(at, at, contents, 0)
    }

    pub fn style(&mut self, from: usize, to: usize, attributes: &[(&str, &str)]) -> TreeOperation {
        let attributes: BTreeMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let op = {
            let mut ctx = ChangeContext::new(&mut self.clock);
            self.tree
                .style(&mut ctx, from, to, &attributes)
                .expect("local style")
        };
        self.record_local();
        op.into()
    }

    pub fn remove_style(&mut self, from: usize, to: usize, keys: &[&str]) -> TreeOperation {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let op = {
            let mut ctx = ChangeContext::new(&mut self.clock);
            self.tree
                .remove_style(&mut ctx, from, to, &keys)
                .expect("local remove_style")
        };
        self.record_local();
        op.into()
    }

    /// Executes an operation received from another replica.
    pub fn apply(&mut self, op: &TreeOperation) {
        op.execute(self.tree.crdt_mut().expect("initialized"))
            .expect("remote operation");
        self.clock.observe(op.executed_at().lamport());
        self.seen.observe(op.actor(), op.executed_at().lamport());
    }

    pub fn xml(&self) -> String {
        self.tree.to_xml().expect("initialized")
    }

    pub fn size(&self) -> usize {
        self.tree.size().expect("initialized")
    }
}

/// Two replicas, actors 1 and 2, that both start from `initial` as created by actor 1.
pub fn replicas(initial: TreeNode) -> (Replica, Replica) {
    init_tracing();

    let mut clock = LogicalClock::new(ActorId::new(1));
    let mut tree = Tree::new(initial);
    {
        let mut ctx = ChangeContext::new(&mut clock);
        tree.initialize(&mut ctx).expect("initialize");
    }
    let mut seen = VersionVector::new();
    seen.observe(clock.actor(), clock.lamport());

    let mut other_clock = LogicalClock::new(ActorId::new(2));
    other_clock.observe(clock.lamport());
    let other = Replica {
        clock: other_clock,
        tree: Tree::from_crdt(tree.crdt().expect("initialized").clone()),
        seen: seen.clone(),
    };
    let this = Replica { clock, tree, seen };
    (this, other)
}

/// Delivers the operations each replica produced to the other one.
pub fn exchange(a: &mut Replica, a_ops: &[TreeOperation], b: &mut Replica, b_ops: &[TreeOperation]) {
    for op in b_ops {
        a.apply(op);
    }
    for op in a_ops {
        b.apply(op);
    }
}

/// Asserts that both replicas hold the same nodes, tombstones and merge links included.
#[track_caller]
pub fn assert_same_records(a: &Replica, b: &Replica) {
    let records = |replica: &Replica| {
        replica
            .tree
            .crdt()
            .expect("initialized")
            .to_node_records()
    };
    assert_eq!(records(a), records(b), "replicas hold different nodes");
}

/// Asserts that both replicas show `expected`.
#[track_caller]
pub fn assert_converged(a: &Replica, b: &Replica, expected: &str) {
    assert_eq!(a.xml(), b.xml(), "replicas diverged");
    assert_eq!(a.xml(), expected);
    assert_eq!(a.size(), b.size());
}
