//! Partition-aligned merge: output partition `i` merges partition `i` of each
//! side. A single-partition side is read by every output partition.

use super::Emitter;
use crate::error::{PlanError, PlanResult};
use crate::expr::JoinSpec;
use crate::plan::PlanRef;
use crate::task::{Task, TaskCall, TaskKey};

pub(crate) fn emit(emitter: &mut Emitter<'_>, node: &PlanRef, spec: &JoinSpec) -> PlanResult<()> {
    let (left, right) = (&node.inputs()[0], &node.inputs()[1]);
    let left_n = emitter.session.npartitions(left)?;
    let right_n = emitter.session.npartitions(right)?;
    if left_n != right_n && left_n != 1 && right_n != 1 {
        return Err(PlanError::InvalidPlan(format!(
            "aligned merge of {} and {} partitions",
            left_n, right_n
        )));
    }
    let layout = emitter.session.merge_layout(node)?;
    let n = emitter.session.npartitions(node)?;
    for i in 0..n {
        let args = vec![emitter.arg(left, i)?, emitter.arg(right, i)?];
        emitter.graph.insert(
            TaskKey::partition(node.name(), i),
            Task::new(
                TaskCall::MergeChunk {
                    spec: spec.clone(),
                    layout: layout.clone(),
                },
                args,
            ),
        );
    }
    Ok(())
}
