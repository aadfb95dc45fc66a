//! Execution equivalence of the physical join strategies.
//!
//! The same abstract join is forced down each strategy (through hints or table
//! metadata), lowered, emitted as a task graph and run on the in-memory executor.
//! Every run must produce the same multiset of rows as a single merge of the
//! fully concatenated inputs.
//!
//! ## What These Tests Verify
//! - Task shuffle, service shuffle and broadcast agree on inner joins
//! - A broadcast `left` join emits every left row exactly once, matched or not
//! - Indexed merge after boundary alignment agrees with an index hash shuffle
//! - Indexed merge handles disjoint key ranges and mixed int/float boundaries
//! - Null keys never match
//! - A failed run cancels every shuffle session it opened

use partx_core::divisions::Divisions;
use partx_core::expr::*;
use partx_core::join::JoinStrategy;
use partx_core::local::{merge_frames, Frame, LocalExecutor};
use partx_core::physical::build_task_graph;
use partx_core::plan::PlanRef;
use partx_core::rewrite::Planner;
use partx_core::schema::{Field, IndexField, Schema};
use partx_core::session::Session;
use partx_rules::default_rule_registry;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn int(v: i64) -> ScalarValue {
    ScalarValue::from(v)
}

fn chunks(columns: &[&str], rows: Vec<Vec<ScalarValue>>, per_partition: usize) -> Vec<Frame> {
    rows.chunks(per_partition)
        .map(|c| Frame::from_rows(columns, c.to_vec()).unwrap())
        .collect()
}

/// 40 rows in 8 partitions; every 11th key is null.
fn facts() -> Vec<Frame> {
    let rows = (0..40)
        .map(|i| {
            let k = if i % 11 == 10 { ScalarValue::Null } else { int(i % 7) };
            vec![k, int(i)]
        })
        .collect();
    chunks(&["k", "x"], rows, 5)
}

/// 8 rows in 2 partitions; key 2 appears twice, key 6 never, one null key.
fn dims() -> Vec<Frame> {
    let keys = [
        int(0),
        int(1),
        int(2),
        int(2),
        int(3),
        int(4),
        ScalarValue::Null,
        int(9),
    ];
    let rows = keys
        .iter()
        .enumerate()
        .map(|(i, k)| vec![k.clone(), int(100 + i as i64)])
        .collect();
    chunks(&["k", "y"], rows, 4)
}

fn schema(columns: &[&str]) -> Schema {
    Schema::new(
        columns.iter().map(|c| Field::new(*c, DataType::Int64)).collect(),
        IndexField::unnamed(DataType::Int64),
    )
}

fn executor() -> LocalExecutor {
    let mut executor = LocalExecutor::new();
    executor.register("facts", facts());
    executor.register("dims", dims());
    executor
}

fn run(session: &Session, executor: &LocalExecutor, root: &PlanRef) -> Frame {
    let registry = default_rule_registry();
    let lowered = Planner::new(session, &registry).plan(root).unwrap();
    let graph = build_task_graph(session, &lowered).unwrap();
    let out = executor.collect(&graph).unwrap();
    assert_eq!(out.columns, session.columns(root).unwrap());
    out
}

/// The join computed in one piece.
fn expected(session: &Session, join: &PlanRef, left: &[Frame], right: &[Frame]) -> Frame {
    let spec = join.op().join_spec().unwrap();
    let layout = session.merge_layout(join).unwrap();
    merge_frames(
        &Frame::concat(left).unwrap(),
        &Frame::concat(right).unwrap(),
        spec,
        &layout,
    )
    .unwrap()
}

fn sorted_rows(frame: &Frame) -> Vec<String> {
    let mut rows: Vec<String> = frame.rows.iter().map(|r| format!("{:?}", r)).collect();
    rows.sort();
    rows
}

fn sorted_indexed_rows(frame: &Frame) -> Vec<String> {
    let mut rows: Vec<String> = frame
        .index
        .iter()
        .zip(frame.rows.iter())
        .map(|(i, r)| format!("{:?} {:?}", i, r))
        .collect();
    rows.sort();
    rows
}

fn join_with(session: &Session, how: JoinType, hints: JoinHints) -> PlanRef {
    let facts = session.source("facts", schema(&["k", "x"]), Divisions::unknown(8));
    let dims = session.source("dims", schema(&["k", "y"]), Divisions::unknown(2));
    session
        .merge(&facts, &dims, JoinSpec::on(how, &["k"]), hints)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Hash-keyed strategies
// ---------------------------------------------------------------------------

#[test]
fn test_inner_join_strategies_agree() {
    let session = Session::default();
    let executor = executor();
    let hints = [
        (
            JoinHints::default().with_broadcast(BroadcastHint::Force(false)),
            JoinStrategy::TaskShuffle,
        ),
        (JoinHints::default().with_broadcast(BroadcastHint::Force(true)), JoinStrategy::Broadcast),
        (
            JoinHints::default().with_shuffle_method(ShuffleMethod::Service),
            JoinStrategy::ServiceShuffle,
        ),
        (
            JoinHints::default()
                .with_broadcast(BroadcastHint::Force(false))
                .with_npartitions(3),
            JoinStrategy::TaskShuffle,
        ),
    ];

    let reference = join_with(&session, JoinType::Inner, JoinHints::default());
    let want = sorted_rows(&expected(&session, &reference, &facts(), &dims()));
    assert!(!want.is_empty());

    for (hint, strategy) in hints {
        let join = join_with(&session, JoinType::Inner, hint);
        assert_eq!(session.join_properties(&join).unwrap().strategy(), strategy);
        let got = run(&session, &executor, &join);
        assert_eq!(sorted_rows(&got), want, "{} disagrees", strategy);
    }
}

#[test]
fn test_broadcast_left_join_emits_each_left_row_once() {
    let session = Session::default();
    let executor = executor();
    let join = join_with(
        &session,
        JoinType::Left,
        JoinHints::default().with_broadcast(BroadcastHint::Force(true)),
    );
    assert_eq!(session.join_properties(&join).unwrap().strategy(), JoinStrategy::Broadcast);

    let got = run(&session, &executor, &join);
    assert_eq!(
        sorted_rows(&got),
        sorted_rows(&expected(&session, &join, &facts(), &dims()))
    );

    // a fact row appears once per matching dimension row, and once if none match
    let x = got.column("x").unwrap();
    for i in 0..40 {
        let copies = x.iter().filter(|v| **v == int(i)).count();
        let want = match i {
            _ if i % 11 == 10 => 1,
            _ if i % 7 == 2 => 2,
            _ => 1,
        };
        assert_eq!(copies, want, "row x={}", i);
    }
}

#[test]
fn test_broadcast_right_join_with_small_left() {
    let session = Session::default();
    let mut executor = executor();
    executor.register("small", dims());
    let small = session.source("small", schema(&["k", "y"]), Divisions::unknown(2));
    let facts = session.source("facts", schema(&["k", "x"]), Divisions::unknown(8));
    let join = session
        .merge(
            &small,
            &facts,
            JoinSpec::on(JoinType::Right, &["k"]),
            JoinHints::default().with_broadcast(BroadcastHint::Force(true)),
        )
        .unwrap();
    let props = session.join_properties(&join).unwrap();
    assert_eq!(props.strategy(), JoinStrategy::Broadcast);
    assert_eq!(props.broadcast_side, JoinSide::Left);

    let got = run(&session, &executor, &join);
    assert_eq!(
        sorted_rows(&got),
        sorted_rows(&expected(&session, &join, &dims(), &crate::facts()))
    );
}

#[test]
fn test_outer_join_keeps_unmatched_rows_of_both_sides() {
    let session = Session::default();
    let executor = executor();
    let join = join_with(&session, JoinType::Outer, JoinHints::default().with_npartitions(4));
    let got = run(&session, &executor, &join);
    assert_eq!(
        sorted_rows(&got),
        sorted_rows(&expected(&session, &join, &facts(), &dims()))
    );
    // the unmatched key 9 survives from the right
    let y = got.column("y").unwrap();
    assert!(y.contains(&int(107)));
}

// ---------------------------------------------------------------------------
// Index-keyed strategies
// ---------------------------------------------------------------------------

fn indexed_partitions(column: &str, ids: &[i64], bounds: &[i64]) -> Vec<Frame> {
    (0..bounds.len() - 1)
        .map(|p| {
            let last = p == bounds.len() - 2;
            let ids: Vec<i64> = ids
                .iter()
                .copied()
                .filter(|id| {
                    *id >= bounds[p] && (*id < bounds[p + 1] || (last && *id == bounds[p + 1]))
                })
                .collect();
            Frame::new(
                vec![column.to_string()],
                Some("id".to_string()),
                ids.iter().map(|id| int(*id)).collect(),
                ids.iter().map(|id| vec![int(id * 10)]).collect(),
            )
            .unwrap()
        })
        .collect()
}

#[test]
fn test_indexed_merge_agrees_with_index_shuffle() {
    let a_ids: Vec<i64> = (0..=30).collect();
    let b_ids: Vec<i64> = (0..=30).filter(|i| i % 3 == 0).collect();
    let a_parts = indexed_partitions("a", &a_ids, &[0, 10, 20, 30]);
    let b_parts = indexed_partitions("b", &b_ids, &[0, 15, 30]);
    let mut executor = LocalExecutor::new();
    executor.register("a", a_parts.clone());
    executor.register("b", b_parts.clone());

    let session = Session::default();
    let indexed_schema = |c: &str| {
        Schema::new(
            vec![Field::new(c, DataType::Int64)],
            IndexField::named("id", DataType::Int64),
        )
    };
    let bounds = |b: &[i64]| Divisions::new(b.iter().map(|v| int(*v)).collect()).unwrap();

    for how in [JoinType::Inner, JoinType::Left, JoinType::Outer] {
        let known = session
            .merge(
                &session.source("a", indexed_schema("a"), bounds(&[0, 10, 20, 30])),
                &session.source("b", indexed_schema("b"), bounds(&[0, 15, 30])),
                JoinSpec::on_index(how),
                JoinHints::default(),
            )
            .unwrap();
        let unknown = session
            .merge(
                &session.source("a", indexed_schema("a"), Divisions::unknown(3)),
                &session.source("b", indexed_schema("b"), Divisions::unknown(2)),
                JoinSpec::on_index(how),
                JoinHints::default().with_broadcast(BroadcastHint::Force(false)),
            )
            .unwrap();
        assert_eq!(
            session.join_properties(&known).unwrap().strategy(),
            JoinStrategy::IndexedMerge
        );
        assert_eq!(
            session.join_properties(&unknown).unwrap().strategy(),
            JoinStrategy::TaskShuffle
        );

        let aligned = run(&session, &executor, &known);
        let shuffled = run(&session, &executor, &unknown);
        let want = sorted_indexed_rows(&expected(&session, &known, &a_parts, &b_parts));
        assert_eq!(sorted_indexed_rows(&aligned), want, "{:?}", how);
        assert_eq!(sorted_indexed_rows(&shuffled), want, "{:?}", how);
    }
}

#[test]
fn test_indexed_merge_of_disjoint_ranges() {
    let a_parts = indexed_partitions("a", &[0, 5, 10], &[0, 10]);
    let b_parts = indexed_partitions("b", &[20, 25, 30], &[20, 25, 30]);
    let mut executor = LocalExecutor::new();
    executor.register("a", a_parts.clone());
    executor.register("b", b_parts.clone());

    let session = Session::default();
    let indexed_schema = |c: &str| {
        Schema::new(
            vec![Field::new(c, DataType::Int64)],
            IndexField::named("id", DataType::Int64),
        )
    };
    let bounds = |b: &[i64]| Divisions::new(b.iter().map(|v| int(*v)).collect()).unwrap();
    let join = session
        .merge(
            &session.source("a", indexed_schema("a"), bounds(&[0, 10])),
            &session.source("b", indexed_schema("b"), bounds(&[20, 25, 30])),
            JoinSpec::on_index(JoinType::Outer),
            JoinHints::default(),
        )
        .unwrap();
    let props = session.join_properties(&join).unwrap();
    assert_eq!(props.strategy(), JoinStrategy::IndexedMerge);
    assert_eq!(session.divisions(&join).unwrap(), bounds(&[0, 10, 20, 25, 30]));

    let out = run(&session, &executor, &join);
    assert_eq!(out.num_rows(), 6);
    assert_eq!(
        sorted_indexed_rows(&out),
        sorted_indexed_rows(&expected(&session, &join, &a_parts, &b_parts))
    );
}

#[test]
fn test_indexed_merge_of_int_and_float_boundaries() {
    let a_ids: Vec<i64> = (0..=20).collect();
    let a_parts = indexed_partitions("a", &a_ids, &[0, 10, 20]);
    let float_part = |ids: &[f64]| {
        Frame::new(
            vec!["b".to_string()],
            Some("id".to_string()),
            ids.iter().map(|id| ScalarValue::from(*id)).collect(),
            ids.iter().map(|id| vec![ScalarValue::from(*id * 2.0)]).collect(),
        )
        .unwrap()
    };
    let b_parts = vec![float_part(&[5.0, 7.5]), float_part(&[10.0, 12.5, 15.0])];
    let mut executor = LocalExecutor::new();
    executor.register("a", a_parts.clone());
    executor.register("b", b_parts.clone());

    let session = Session::default();
    let a = session.source(
        "a",
        Schema::new(
            vec![Field::new("a", DataType::Int64)],
            IndexField::named("id", DataType::Int64),
        ),
        Divisions::new([0i64, 10, 20].map(int).to_vec()).unwrap(),
    );
    let b = session.source(
        "b",
        Schema::new(
            vec![Field::new("b", DataType::Float64)],
            IndexField::named("id", DataType::Float64),
        ),
        Divisions::new([5.0f64, 10.0, 15.0].map(ScalarValue::from).to_vec()).unwrap(),
    );
    let join = session
        .merge(&a, &b, JoinSpec::on_index(JoinType::Inner), JoinHints::default())
        .unwrap();
    assert_eq!(
        session.join_properties(&join).unwrap().strategy(),
        JoinStrategy::IndexedMerge
    );
    let divisions = session.divisions(&join).unwrap();
    assert_eq!(divisions.npartitions(), 4);
    assert_eq!(divisions.values()[1], ScalarValue::from(5.0));

    let out = run(&session, &executor, &join);
    // 5, 10 and 15 match; 7.5 and 12.5 have no integer partner
    assert_eq!(out.num_rows(), 3);
    assert_eq!(
        sorted_indexed_rows(&out),
        sorted_indexed_rows(&expected(&session, &join, &a_parts, &b_parts))
    );
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

#[test]
fn test_failed_service_join_cancels_its_shuffles() {
    use partx_core::local::InMemoryShuffleService;
    use partx_core::task::TaskCall;
    use std::sync::Arc;

    let session = Session::default();
    let join = join_with(
        &session,
        JoinType::Inner,
        JoinHints::default().with_shuffle_method(ShuffleMethod::Service),
    );
    let registry = default_rule_registry();
    let lowered = Planner::new(&session, &registry).plan(&join).unwrap();
    let graph = build_task_graph(&session, &lowered).unwrap();

    let service = Arc::new(InMemoryShuffleService::new());
    let mut executor = LocalExecutor::with_service(service.clone());
    // `dims` is missing, so the right side's transfers fail
    executor.register("facts", facts());
    assert!(executor.execute(&graph).is_err());

    let tokens: Vec<&String> = graph
        .tasks
        .values()
        .filter_map(|t| match &t.call {
            TaskCall::ShuffleBarrier { token } => Some(token),
            _ => None,
        })
        .collect();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().all(|t| service.is_cancelled(t)));
    assert!(service.active_tokens().is_empty());
}
