//! Broadcast join: every partition of the streaming side is merged against each
//! of the `b` partitions (replicas) of the broadcast side and the `b` results are
//! concatenated.
//!
//! For an `inner` join the whole streaming partition meets every replica. For
//! any other join type the streaming partition is first split into `b` local
//! buckets with the same hash the broadcast side was redistributed with, and
//! bucket `j` meets only replica `j`. Every streaming row is then compared with
//! exactly one replica, so an unmatched row is emitted once instead of once per
//! replica.

use super::Emitter;
use crate::error::PlanResult;
use crate::expr::{JoinSide, JoinSpec, JoinType, ShuffleKey};
use crate::plan::PlanRef;
use crate::task::{Task, TaskArg, TaskCall, TaskKey};
use tracing::trace;

pub(crate) fn emit(
    emitter: &mut Emitter<'_>,
    node: &PlanRef,
    spec: &JoinSpec,
    side: JoinSide,
    split_on: &ShuffleKey,
) -> PlanResult<()> {
    let (broadcast, streaming) = match side {
        JoinSide::Left => (&node.inputs()[0], &node.inputs()[1]),
        JoinSide::Right => (&node.inputs()[1], &node.inputs()[0]),
    };
    let b = emitter.session.npartitions(broadcast)?;
    let n = emitter.session.npartitions(streaming)?;
    let bucketed = spec.how != JoinType::Inner;
    let layout = emitter.session.merge_layout(node)?;
    let split = format!("split-{}", node.id());
    let inter = format!("inter-{}", node.id());
    trace!(
        "{}: {} streaming partitions x {} replicas, bucketed={}",
        node.name(),
        n,
        b,
        bucketed
    );

    for i in 0..n {
        let streaming_part = TaskKey::partition(streaming.name(), i);
        if bucketed {
            emitter.graph.insert(
                TaskKey::new(split.as_str(), &[i]),
                Task::new(
                    TaskCall::HashSplit {
                        on: split_on.clone(),
                        buckets: b,
                    },
                    vec![TaskArg::Key(streaming_part.clone())],
                ),
            );
        }
        let mut pieces = Vec::with_capacity(b);
        for j in 0..b {
            let streaming_arg = if bucketed {
                TaskArg::Item(TaskKey::new(split.as_str(), &[i]), j)
            } else {
                TaskArg::Key(streaming_part.clone())
            };
            let replica = TaskArg::Key(TaskKey::partition(broadcast.name(), j));
            let args = match side {
                JoinSide::Left => vec![replica, streaming_arg],
                JoinSide::Right => vec![streaming_arg, replica],
            };
            let key = TaskKey::new(inter.as_str(), &[i, j]);
            emitter.graph.insert(
                key.clone(),
                Task::new(
                    TaskCall::MergeChunk {
                        spec: spec.clone(),
                        layout: layout.clone(),
                    },
                    args,
                ),
            );
            pieces.push(TaskArg::Key(key));
        }
        emitter.graph.insert(
            TaskKey::partition(node.name(), i),
            Task::new(TaskCall::Concat, pieces),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::divisions::Divisions;
    use crate::expr::{DataType, JoinSide, JoinSpec, JoinType, ShuffleKey};
    use crate::physical::build_task_graph;
    use crate::schema::{Field, IndexField, Schema};
    use crate::session::Session;
    use crate::task::{TaskArg, TaskCall, TaskKey};

    fn sources(session: &Session) -> (crate::plan::PlanRef, crate::plan::PlanRef) {
        let schema = |v: &str| {
            Schema::new(
                vec![Field::new("k", DataType::Int64), Field::new(v, DataType::Int64)],
                IndexField::unnamed(DataType::Int64),
            )
        };
        (
            session.source("big", schema("a"), Divisions::unknown(4)),
            session.source("small", schema("b"), Divisions::unknown(2)),
        )
    }

    #[test]
    fn test_inner_broadcast_merges_whole_partitions() {
        let session = Session::default();
        let (big, small) = sources(&session);
        let on = ShuffleKey::Columns(vec!["k".to_string()]);
        let spec = JoinSpec::on(JoinType::Inner, &["k"]);
        let j = session.broadcast_join(&big, &small, spec, JoinSide::Right, on);
        let graph = build_task_graph(&session, &j).unwrap();

        // 4 reads, 2 reads, 4 x 2 merges, 4 concats
        assert_eq!(graph.len(), 4 + 2 + 8 + 4);
        assert!(graph.keys_where(|c| matches!(c, TaskCall::HashSplit { .. })).is_empty());
        let inter = graph
            .get(&TaskKey::new(format!("inter-{}", j.id()), &[3, 1]))
            .unwrap();
        assert_eq!(inter.args[0], TaskArg::Key(TaskKey::partition(big.name(), 3)));
        assert_eq!(inter.args[1], TaskArg::Key(TaskKey::partition(small.name(), 1)));
    }

    #[test]
    fn test_outer_style_broadcast_buckets_streaming_side() {
        let session = Session::default();
        let (big, small) = sources(&session);
        let on = ShuffleKey::Columns(vec!["k".to_string()]);
        // small on the left, big streaming: a right join
        let spec = JoinSpec::on(JoinType::Right, &["k"]);
        let j = session.broadcast_join(&small, &big, spec, JoinSide::Left, on);
        let graph = build_task_graph(&session, &j).unwrap();

        assert_eq!(graph.keys_where(|c| matches!(c, TaskCall::HashSplit { .. })).len(), 4);
        let inter = graph
            .get(&TaskKey::new(format!("inter-{}", j.id()), &[0, 1]))
            .unwrap();
        // argument order is left, right
        assert_eq!(inter.args[0], TaskArg::Key(TaskKey::partition(small.name(), 1)));
        assert_eq!(
            inter.args[1],
            TaskArg::Item(TaskKey::new(format!("split-{}", j.id()), &[0]), 1)
        );
        assert_eq!(session.npartitions(&j).unwrap(), 4);
    }
}
