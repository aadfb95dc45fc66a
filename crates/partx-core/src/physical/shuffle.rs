//! Hash redistribution over the task transport.
//!
//! ```text
//!   transfer(i)  = HashSplit(input i)              for every input partition
//!   barrier      = Barrier(transfer(0..n_in))
//!   output(j)    = CollectBucket(barrier, transfer(0..n_in)[j])
//! ```
//!
//! Every output depends on the barrier, so no bucket is read until every input
//! partition has been split.

use super::Emitter;
use crate::error::PlanResult;
use crate::expr::ShuffleKey;
use crate::plan::PlanRef;
use crate::task::{Task, TaskArg, TaskCall, TaskKey};

pub(crate) fn emit(
    emitter: &mut Emitter<'_>,
    node: &PlanRef,
    on: &ShuffleKey,
    npartitions_out: usize,
) -> PlanResult<()> {
    let input = super::single_input(node)?;
    let n_in = emitter.session.npartitions(input)?;
    let transfer = format!("shuffle-transfer-{}", node.id());
    let barrier = TaskKey::single(format!("shuffle-barrier-{}", node.id()));

    for i in 0..n_in {
        emitter.graph.insert(
            TaskKey::partition(transfer.as_str(), i),
            Task::new(
                TaskCall::HashSplit {
                    on: on.clone(),
                    buckets: npartitions_out,
                },
                vec![TaskArg::Key(TaskKey::partition(input.name(), i))],
            ),
        );
    }
    emitter.graph.insert(
        barrier.clone(),
        Task::new(
            TaskCall::Barrier,
            (0..n_in)
                .map(|i| TaskArg::Key(TaskKey::partition(transfer.as_str(), i)))
                .collect(),
        ),
    );
    for j in 0..npartitions_out {
        let mut args = vec![TaskArg::Key(barrier.clone())];
        args.extend((0..n_in).map(|i| TaskArg::Item(TaskKey::partition(transfer.as_str(), i), j)));
        emitter.graph.insert(
            TaskKey::partition(node.name(), j),
            Task::new(TaskCall::CollectBucket { bucket: j }, args),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::divisions::Divisions;
    use crate::expr::{DataType, ScalarValue, ShuffleKey};
    use crate::local::{partition_index, Frame, LocalExecutor};
    use crate::physical::build_task_graph;
    use crate::schema::{Field, IndexField, Schema};
    use crate::session::Session;
    use crate::task::{TaskCall, TaskKey};

    #[test]
    fn test_every_bucket_waits_for_the_barrier() {
        let session = Session::default();
        let schema = Schema::new(
            vec![Field::new("k", DataType::Int64)],
            IndexField::unnamed(DataType::Int64),
        );
        let t = session.source("t", schema, Divisions::unknown(3));
        let on = ShuffleKey::Columns(vec!["k".to_string()]);
        let s = session.shuffle(&t, on.clone(), 4);
        let graph = build_task_graph(&session, &s).unwrap();

        let barrier = TaskKey::single(format!("shuffle-barrier-{}", s.id()));
        assert_eq!(graph.get(&barrier).unwrap().args.len(), 3);
        for j in 0..4 {
            let collect = graph.get(&TaskKey::partition(s.name(), j)).unwrap();
            assert_eq!(collect.call, TaskCall::CollectBucket { bucket: j });
            assert_eq!(collect.args[0].key(), Some(&barrier));
            assert_eq!(collect.args.len(), 4);
        }

        let mut executor = LocalExecutor::new();
        let part = |keys: &[i64]| {
            Frame::from_rows(&["k"], keys.iter().map(|k| vec![ScalarValue::from(*k)]).collect())
                .unwrap()
        };
        executor.register("t", vec![part(&[1, 2, 3]), part(&[4, 1]), part(&[2, 7, 7])]);
        let buckets = executor.execute(&graph).unwrap();
        assert_eq!(buckets.iter().map(|b| b.num_rows()).sum::<usize>(), 8);
        for (j, bucket) in buckets.iter().enumerate() {
            for k in bucket.column("k").unwrap() {
                assert_eq!(partition_index(&[k], 4), j);
            }
        }
    }
}
