// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use arbor::{
    ActorId, LogicalClock, Tree, TreeNode, TreeOperation, VersionVector, api::ChangeContext,
};
use std::{collections::BTreeMap, hint::black_box};
use tango_bench::{IntoBenchmarks, benchmark_fn, tango_benchmarks, tango_main};

const PARAGRAPHS: usize = 255;

/// A document of `PARAGRAPHS` paragraphs of text, bound to actor 1.
fn document() -> (LogicalClock, Tree) {
    let mut root = TreeNode::element("doc");
    for i in 0..PARAGRAPHS {
        root = root.with_child(
            TreeNode::element("p").with_child(TreeNode::text(format!("paragraph number {i}"))),
        );
    }
    let mut clock = LogicalClock::new(ActorId::new(1));
    let mut tree = Tree::new(root);
    tree.initialize(&mut ChangeContext::new(&mut clock))
        .expect("document is well-formed");
    (clock, tree)
}

/// An index inside the text of the middle paragraph.
fn middle_of(tree: &Tree) -> usize {
    tree.path_to_index(&[PARAGRAPHS / 2, 3])
        .expect("the middle paragraph exists")
}

fn local_benchmarks() -> impl IntoBenchmarks {
    arbor::enable_determinism();

    let doc: &'static _ = Box::leak(Box::new(document()));
    let middle = middle_of(&doc.1);
    let attributes: &'static _ = Box::leak(Box::new(BTreeMap::from([(
        "bold".to_string(),
        "true".to_string(),
    )])));
    [
        benchmark_fn("tree::initialize", move |b| {
            b.iter(move || black_box(document()))
        }),
        benchmark_fn("tree::insert_text", move |b| {
            b.iter(move || {
                let (mut clock, mut tree) = black_box(doc.clone());
                tree.edit(
                    &mut ChangeContext::new(&mut clock),
                    middle,
                    middle,
                    &[TreeNode::text("x")],
                    0,
                )
            })
        }),
        benchmark_fn("tree::insert_element", move |b| {
            b.iter(move || {
                let (mut clock, mut tree) = black_box(doc.clone());
                tree.edit(
                    &mut ChangeContext::new(&mut clock),
                    0,
                    0,
                    &[TreeNode::element("p").with_child(TreeNode::text("new"))],
                    0,
                )
            })
        }),
        benchmark_fn("tree::delete_range", move |b| {
            b.iter(move || {
                let (mut clock, mut tree) = black_box(doc.clone());
                tree.edit(&mut ChangeContext::new(&mut clock), 0, middle, &[], 0)
            })
        }),
        benchmark_fn("tree::split", move |b| {
            b.iter(move || {
                let (mut clock, mut tree) = black_box(doc.clone());
                tree.edit(&mut ChangeContext::new(&mut clock), middle, middle, &[], 1)
            })
        }),
        benchmark_fn("tree::style", move |b| {
            b.iter(move || {
                let (mut clock, mut tree) = black_box(doc.clone());
                tree.style(&mut ChangeContext::new(&mut clock), 0, middle, attributes)
            })
        }),
        benchmark_fn("tree::index_to_path", move |b| {
            b.iter(move || black_box(&doc.1).index_to_path(middle))
        }),
        benchmark_fn("tree::to_xml", move |b| {
            b.iter(move || black_box(&doc.1).to_xml())
        }),
    ]
}

fn remote_benchmarks() -> impl IntoBenchmarks {
    arbor::enable_determinism();

    let (mut clock, mut tree) = document();
    let remote = tree.clone();
    let middle = middle_of(&tree);
    let ops: Vec<TreeOperation> = (0..16)
        .map(|i| {
            let mut ctx = ChangeContext::new(&mut clock);
            let at = middle + i;
            let op = if i % 4 == 3 {
                tree.edit(&mut ctx, at - 2, at, &[], 0)
            } else {
                tree.edit(&mut ctx, at, at, &[TreeNode::text("ab")], 0)
            };
            op.expect("valid edit").into()
        })
        .collect();
    let ops: &'static [TreeOperation] = Box::leak(ops.into_boxed_slice());
    let remote: &'static _ = Box::leak(Box::new(remote));
    let edited: &'static _ = Box::leak(Box::new(tree));

    let mut synced = VersionVector::new();
    synced.observe(ActorId::new(1), clock.lamport());
    let synced: &'static _ = Box::leak(Box::new(synced));
    [
        benchmark_fn("tree::execute_remote", move |b| {
            b.iter(move || {
                let mut tree = black_box(remote.clone());
                let crdt = tree.crdt_mut().expect("initialized");
                for op in ops {
                    let _ = op.execute(crdt);
                }
                tree
            })
        }),
        benchmark_fn("tree::garbage_collect", move |b| {
            b.iter(move || {
                let mut tree = black_box(edited.clone());
                tree.crdt_mut()
                    .map(|crdt| crdt.garbage_collect(synced))
            })
        }),
        benchmark_fn("tree::node_records", move |b| {
            b.iter(move || {
                black_box(edited)
                    .crdt()
                    .map(|crdt| crdt.to_node_records())
            })
        }),
    ]
}

fn version_vector_benchmarks() -> impl IntoBenchmarks {
    let vectors: Vec<VersionVector> = (0..32)
        .map(|replica| {
            let mut vv = VersionVector::new();
            for actor in 0..64 {
                vv.observe(ActorId::new(actor), u64::from(actor * 31 + replica) % 997 + 1);
            }
            vv
        })
        .collect();
    let vectors: &'static [VersionVector] = Box::leak(vectors.into_boxed_slice());
    [benchmark_fn("version-vector::min_of", move |b| {
        b.iter(move || VersionVector::min_of(black_box(vectors)))
    })]
}

tango_benchmarks!(
    local_benchmarks(),
    remote_benchmarks(),
    version_vector_benchmarks()
);
tango_main!();
