//! End-to-end strategy selection tests.
//!
//! Each test builds an abstract join, runs the full planner (rewrite, then
//! lowering) with the default rule registry, and checks the physical strategy it
//! picked, the partition count it reports and the recipe the strategy emits.
//!
//! ## Scenarios
//! - Index join of `[0,10,20,30]` and `[0,15,30]`: indexed merge over
//!   `[0,10,15,20,30]`, 4 output partitions
//! - 2 against 64 partitions at bias 0.5: broadcast join
//! - 1-partition right table with `how=right`: not a single-partition broadcast
//! - Recursive join of several indexed tables: no abstract join survives lowering

use ordered_float::OrderedFloat;
use partx_core::config::PlannerConfig;
use partx_core::divisions::{merge_boundaries, Divisions};
use partx_core::expr::*;
use partx_core::join::{is_single_partition_broadcast, JoinStrategy};
use partx_core::physical::build_task_graph;
use partx_core::plan::PlanRef;
use partx_core::rewrite::Planner;
use partx_core::schema::{Field, IndexField, Schema};
use partx_core::session::Session;
use partx_core::task::TaskCall;
use partx_rules::default_rule_registry;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn keyed(session: &Session, name: &str, npartitions: usize) -> PlanRef {
    let schema = Schema::new(
        vec![
            Field::new("k", DataType::Int64),
            Field::new(format!("{}_v", name), DataType::Float64),
        ],
        IndexField::unnamed(DataType::Int64),
    );
    session.source(name, schema, Divisions::unknown(npartitions))
}

fn indexed(session: &Session, name: &str, bounds: &[i64]) -> PlanRef {
    let schema = Schema::new(
        vec![Field::new(format!("{}_v", name), DataType::Int64)],
        IndexField::named("id", DataType::Int64),
    );
    let divisions = Divisions::new(ints(bounds)).unwrap();
    session.source(name, schema, divisions)
}

fn ints(values: &[i64]) -> Vec<ScalarValue> {
    values.iter().map(|v| ScalarValue::from(*v)).collect()
}

fn plan(session: &Session, root: &PlanRef) -> PlanRef {
    let registry = default_rule_registry();
    let mut planner = Planner::new(session, &registry);
    planner.plan(root).unwrap()
}

fn has_logical(root: &PlanRef) -> bool {
    root.post_order().iter().any(|n| n.op().is_logical())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_indexed_merge_scenario() {
    let session = Session::default();
    let a = indexed(&session, "a", &[0, 10, 20, 30]);
    let b = indexed(&session, "b", &[0, 15, 30]);
    let m = session
        .merge(&a, &b, JoinSpec::on_index(JoinType::Inner), JoinHints::default())
        .unwrap();

    let props = session.join_properties(&m).unwrap();
    assert_eq!(props.strategy(), JoinStrategy::IndexedMerge);
    assert_eq!(props.divisions.values(), ints(&[0, 10, 15, 20, 30]).as_slice());
    assert_eq!(session.npartitions(&m).unwrap(), 4);

    let lowered = plan(&session, &m);
    assert_eq!(lowered.kind(), OpKind::AlignedMerge);
    assert_eq!(session.divisions(&lowered).unwrap(), props.divisions);

    let graph = build_task_graph(&session, &lowered).unwrap();
    assert_eq!(graph.outputs.len(), 4);
    let merges = graph.keys_where(|call| matches!(call, TaskCall::MergeChunk { .. }));
    assert_eq!(merges.len(), 4);
}

#[test]
fn test_broadcast_scenario() {
    let session = Session::default();
    let large = keyed(&session, "large", 64);
    let small = keyed(&session, "small", 2);
    let m = session
        .merge(&large, &small, JoinSpec::on(JoinType::Inner, &["k"]), JoinHints::default())
        .unwrap();
    // 2 < 0.5 * log2(64) = 3
    assert_eq!(session.join_properties(&m).unwrap().strategy(), JoinStrategy::Broadcast);

    let lowered = plan(&session, &m);
    assert_eq!(lowered.kind(), OpKind::BroadcastJoin);
    assert_eq!(session.npartitions(&lowered).unwrap(), 64);

    let graph = build_task_graph(&session, &lowered).unwrap();
    assert_eq!(graph.outputs.len(), 64);
    // one partial merge per (streaming, broadcast) partition pair
    let merges = graph.keys_where(|call| matches!(call, TaskCall::MergeChunk { .. }));
    assert_eq!(merges.len(), 128);
}

#[test]
fn test_bias_changes_the_decision() {
    let session = Session::new(PlannerConfig {
        broadcast_bias: 0.25,
        ..Default::default()
    });
    let large = keyed(&session, "large", 64);
    let small = keyed(&session, "small", 2);
    let m = session
        .merge(&large, &small, JoinSpec::on(JoinType::Inner, &["k"]), JoinHints::default())
        .unwrap();
    // 2 < 0.25 * 6 fails
    assert_eq!(session.join_properties(&m).unwrap().strategy(), JoinStrategy::TaskShuffle);

    let hinted = session
        .merge(
            &large,
            &small,
            JoinSpec::on(JoinType::Inner, &["k"]),
            JoinHints::default().with_broadcast(BroadcastHint::Bias(OrderedFloat(1.0))),
        )
        .unwrap();
    assert_eq!(session.join_properties(&hinted).unwrap().strategy(), JoinStrategy::Broadcast);
}

#[test]
fn test_one_partition_right_table_with_right_join() {
    assert!(!is_single_partition_broadcast(JoinType::Right, 8, 1));
    assert!(is_single_partition_broadcast(JoinType::Right, 1, 8));

    let session = Session::default();
    let left = keyed(&session, "left", 8);
    let right = keyed(&session, "right", 1);
    let m = session
        .merge(&left, &right, JoinSpec::on(JoinType::Right, &["k"]), JoinHints::default())
        .unwrap();
    let props = session.join_properties(&m).unwrap();
    assert!(!props.single_partition_broadcast);
    // the right side is preserved, so it can not be the replicated one
    assert_eq!(props.strategy(), JoinStrategy::TaskShuffle);

    let lowered = plan(&session, &m);
    assert_eq!(lowered.kind(), OpKind::AlignedMerge);
    for input in lowered.inputs() {
        assert_eq!(input.kind(), OpKind::Shuffle);
    }
}

#[test]
fn test_outer_join_never_broadcasts() {
    let session = Session::default();
    let large = keyed(&session, "large", 64);
    let small = keyed(&session, "small", 2);
    let m = session
        .merge(
            &large,
            &small,
            JoinSpec::on(JoinType::Outer, &["k"]),
            JoinHints::default().with_broadcast(BroadcastHint::Force(true)),
        )
        .unwrap();
    assert_eq!(session.join_properties(&m).unwrap().strategy(), JoinStrategy::TaskShuffle);
}

#[test]
fn test_strategy_selection_is_deterministic() {
    let build = || {
        let session = Session::default();
        let a = keyed(&session, "a", 12);
        let b = keyed(&session, "b", 5);
        let m = session
            .merge(&a, &b, JoinSpec::on(JoinType::Left, &["k"]), JoinHints::default())
            .unwrap();
        let lowered = plan(&session, &m);
        let graph = build_task_graph(&session, &lowered).unwrap();
        (lowered.id(), lowered.explain(), graph.len())
    };
    assert_eq!(build(), build());
}

#[test]
fn test_merge_boundaries_properties() {
    let a = ints(&[0, 5, 5, 10]);
    let merged = merge_boundaries(&a, &a);
    assert_eq!(merged, ints(&[0, 5, 10]));

    let merged = merge_boundaries(&ints(&[3, 7, 20]), &ints(&[0, 7, 9, 30]));
    assert_eq!(merged, ints(&[0, 3, 7, 9, 20, 30]));
    assert!(merged.windows(2).all(|w| w[0].compare(&w[1]) == Some(std::cmp::Ordering::Less)));
}

// ---------------------------------------------------------------------------
// Multi-way and semi joins
// ---------------------------------------------------------------------------

#[test]
fn test_recursive_join_lowers_completely() {
    let session = Session::default();
    let frames: Vec<PlanRef> = (0..5)
        .map(|i| indexed(&session, &format!("t{}", i), &[0, 50, 100]))
        .collect();
    let root = session.join_recursive(&frames, JoinType::Outer).unwrap();
    let lowered = plan(&session, &root);
    assert!(!has_logical(&lowered));
    assert_eq!(session.meta(&lowered).unwrap(), session.meta(&root).unwrap());

    let graph = build_task_graph(&session, &lowered).unwrap();
    assert_eq!(graph.outputs.len(), session.npartitions(&lowered).unwrap());
}

#[test]
fn test_semi_join_lowers_through_deduplication() {
    let session = Session::default();
    let a = keyed(&session, "a", 6);
    let b = keyed(&session, "b", 6);
    let semi = session
        .semi_merge(&a, &b, JoinSpec::on(JoinType::Inner, &["k"]), JoinHints::default())
        .unwrap();
    let lowered = plan(&session, &semi);
    assert!(!has_logical(&lowered));
    assert!(lowered
        .post_order()
        .iter()
        .any(|n| n.kind() == OpKind::DropDuplicates));
    assert_eq!(session.columns(&lowered).unwrap(), vec!["k", "a_v"]);
}
