//! # Task Recipes
//!
//! Lowered plans are emitted as a [`TaskGraph`]: a map from task key to a
//! recipe (a call plus argument references). A node's output partition `i` is
//! the task keyed `(node name, i)`; auxiliary tasks (splits, transfers,
//! barriers, per-replica merges) use derived names with extra index components.
//!
//! Arguments reference other tasks, a single bucket of a task that produced
//! buckets, or an inline literal. The graph is what the execution substrate
//! consumes; this crate ships a reference executor in [`crate::local`].

use crate::error::{PlanError, PlanResult};
use crate::expr::{BinaryOp, JoinSpec, ScalarValue, ShuffleKey, UnaryOp};
use crate::local::Frame;
use crate::schema::MergeLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub name: String,
    pub index: Vec<usize>,
}

impl TaskKey {
    pub fn new(name: impl Into<String>, index: &[usize]) -> Self {
        Self {
            name: name.into(),
            index: index.to_vec(),
        }
    }

    /// Output partition `i` of `name`.
    pub fn partition(name: impl Into<String>, i: usize) -> Self {
        Self::new(name, &[i])
    }

    /// A task without a partition index (barriers).
    pub fn single(name: impl Into<String>) -> Self {
        Self::new(name, &[])
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}'", self.name)?;
        for i in &self.index {
            write!(f, ", {}", i)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskArg {
    Key(TaskKey),
    /// Bucket `j` of a task that produced buckets.
    Item(TaskKey, usize),
    Literal(ScalarValue),
}

impl TaskArg {
    pub fn key(&self) -> Option<&TaskKey> {
        match self {
            TaskArg::Key(k) | TaskArg::Item(k, _) => Some(k),
            TaskArg::Literal(_) => None,
        }
    }
}

/// What a task computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskCall {
    ReadPartition { source: String, partition: usize },
    Project { columns: Vec<String> },
    Index,
    /// Args: frame, boolean mask.
    Filter,
    Binop(BinaryOp),
    Unaryop(UnaryOp),
    IsIn(Vec<ScalarValue>),
    Function(String),
    DropDuplicates { on: ShuffleKey },
    Concat,
    /// Concatenate the args and keep rows with index in `[lower, upper)`, or
    /// `[lower, upper]` when `closed`.
    SliceDivisions {
        lower: ScalarValue,
        upper: ScalarValue,
        closed: bool,
    },
    /// Piece `piece` of `pieces` equal row-position slices.
    SplitRows { pieces: usize, piece: usize },
    /// Split a partition into `buckets` by key hash.
    HashSplit { on: ShuffleKey, buckets: usize },
    /// Completes once every argument has completed.
    Barrier,
    /// Concatenate bucket `bucket` of every transfer. The first arg is the barrier.
    CollectBucket { bucket: usize },
    /// Args: left partition, right partition.
    MergeChunk { spec: JoinSpec, layout: MergeLayout },
    ShuffleTransfer {
        token: String,
        input_partition: usize,
        npartitions_out: usize,
        on: ShuffleKey,
    },
    ShuffleBarrier { token: String },
    /// Args: left barrier, right barrier.
    MergeUnpack {
        left_token: String,
        right_token: String,
        output_partition: usize,
        spec: JoinSpec,
        layout: MergeLayout,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub call: TaskCall,
    pub args: Vec<TaskArg>,
}

impl Task {
    pub fn new(call: TaskCall, args: Vec<TaskArg>) -> Self {
        Self { call, args }
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &TaskKey> {
        self.args.iter().filter_map(|a| a.key())
    }
}

/// Task recipes for every partition of a lowered plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: BTreeMap<TaskKey, Task>,
    /// Output partitions of the plan root, in partition order.
    pub outputs: Vec<TaskKey>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: TaskKey, task: Task) {
        self.tasks.insert(key, task);
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every key whose call matches `pred`.
    pub fn keys_where(&self, pred: impl Fn(&TaskCall) -> bool) -> Vec<&TaskKey> {
        self.tasks
            .iter()
            .filter(|(_, t)| pred(&t.call))
            .map(|(k, _)| k)
            .collect()
    }

    /// Check that every argument and output references a task in the graph.
    pub fn validate(&self) -> PlanResult<()> {
        for (key, task) in &self.tasks {
            for dep in task.dependencies() {
                if !self.tasks.contains_key(dep) {
                    return Err(PlanError::MissingTask(format!("{} (needed by {})", dep, key)));
                }
            }
        }
        for out in &self.outputs {
            if !self.tasks.contains_key(out) {
                return Err(PlanError::MissingTask(out.to_string()));
            }
        }
        Ok(())
    }
}

/// Out-of-band shuffle service addressed by token.
///
/// A token names one redistribution session. The planner derives tokens from the
/// owning join's identity, so two joins never share buffered rows.
pub trait ShuffleService {
    /// Hand one input partition to the service, to be split into
    /// `npartitions_out` buckets by `on`.
    fn transfer(
        &self,
        token: &str,
        input_partition: usize,
        npartitions_out: usize,
        on: &ShuffleKey,
        partition: Frame,
    ) -> PlanResult<()>;

    /// Mark the end of all transfers for `token`.
    fn barrier(&self, token: &str) -> PlanResult<()>;

    /// Rows of output bucket `output`. Only valid after the barrier.
    fn unpack(&self, token: &str, output: usize) -> PlanResult<Frame>;

    /// Drop all state for `token`. Later calls for it fail with `Cancelled`.
    fn cancel(&self, token: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reports_dangling_reference() {
        let mut graph = TaskGraph::new();
        graph.insert(
            TaskKey::partition("concat-1", 0),
            Task::new(TaskCall::Concat, vec![TaskArg::Key(TaskKey::partition("missing", 0))]),
        );
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, PlanError::MissingTask(_)));
        assert_eq!(TaskKey::new("inter-x", &[1, 2]).to_string(), "('inter-x', 1, 2)");
    }
}
