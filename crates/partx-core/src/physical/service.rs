//! Hash join through the out-of-band shuffle service.
//!
//! Each side transfers its partitions to the service under its own token and
//! seals the session with a barrier. Output partition `j` unpacks bucket `j` of
//! both sessions and merges them; it depends on both barriers, and each barrier
//! depends on every transfer of its side.
//!
//! A token is a hash of the owning join's identity, the side, the input's
//! identity, the shuffle key and the side's index flag. Two joins never share a
//! token, and neither do the two sides of a self-join.

use super::Emitter;
use crate::error::PlanResult;
use crate::expr::{JoinSide, JoinSpec, ShuffleKey};
use crate::plan::{NodeId, PlanRef};
use crate::task::{Task, TaskArg, TaskCall, TaskKey};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Token of one side of a service-shuffle join.
pub fn shuffle_token(
    join: NodeId,
    side: JoinSide,
    input: NodeId,
    on: &ShuffleKey,
    index_flag: bool,
) -> String {
    let mut hasher = DefaultHasher::new();
    join.hash(&mut hasher);
    side.hash(&mut hasher);
    input.hash(&mut hasher);
    on.hash(&mut hasher);
    index_flag.hash(&mut hasher);
    format!("shuffle-{:016x}", hasher.finish())
}

pub(crate) fn emit(
    emitter: &mut Emitter<'_>,
    node: &PlanRef,
    spec: &JoinSpec,
    left_on: &ShuffleKey,
    right_on: &ShuffleKey,
    npartitions: Option<usize>,
) -> PlanResult<()> {
    let n_out = match npartitions {
        Some(n) => n,
        None => emitter.session.npartitions(node)?,
    };
    let left_barrier = transfer_side(emitter, node, JoinSide::Left, left_on, spec, n_out)?;
    let right_barrier = transfer_side(emitter, node, JoinSide::Right, right_on, spec, n_out)?;
    let layout = emitter.session.merge_layout(node)?;
    for j in 0..n_out {
        emitter.graph.insert(
            TaskKey::partition(node.name(), j),
            Task::new(
                TaskCall::MergeUnpack {
                    left_token: left_barrier.0.clone(),
                    right_token: right_barrier.0.clone(),
                    output_partition: j,
                    spec: spec.clone(),
                    layout: layout.clone(),
                },
                vec![
                    TaskArg::Key(left_barrier.1.clone()),
                    TaskArg::Key(right_barrier.1.clone()),
                ],
            ),
        );
    }
    Ok(())
}

/// Emit the transfers and barrier of one side. Returns the token and the
/// barrier's key.
fn transfer_side(
    emitter: &mut Emitter<'_>,
    node: &PlanRef,
    side: JoinSide,
    on: &ShuffleKey,
    spec: &JoinSpec,
    n_out: usize,
) -> PlanResult<(String, TaskKey)> {
    let input = match side {
        JoinSide::Left => &node.inputs()[0],
        JoinSide::Right => &node.inputs()[1],
    };
    let token = shuffle_token(node.id(), side, input.id(), on, spec.index_flag(side));
    let n_in = emitter.session.npartitions(input)?;
    let transfer = format!("{}-transfer", token);
    for i in 0..n_in {
        emitter.graph.insert(
            TaskKey::partition(transfer.as_str(), i),
            Task::new(
                TaskCall::ShuffleTransfer {
                    token: token.clone(),
                    input_partition: i,
                    npartitions_out: n_out,
                    on: on.clone(),
                },
                vec![TaskArg::Key(TaskKey::partition(input.name(), i))],
            ),
        );
    }
    let barrier = TaskKey::single(format!("{}-barrier", token));
    emitter.graph.insert(
        barrier.clone(),
        Task::new(
            TaskCall::ShuffleBarrier {
                token: token.clone(),
            },
            (0..n_in)
                .map(|i| TaskArg::Key(TaskKey::partition(transfer.as_str(), i)))
                .collect(),
        ),
    );
    Ok((token, barrier))
}
