//! # Recipe Emission
//!
//! [`build_task_graph`] turns a lowered plan into a [`TaskGraph`]. Nodes are
//! visited inputs-first; each node registers one task per output partition under
//! `(node.name(), i)` plus any auxiliary tasks its recipe needs. Literal inputs
//! are inlined as task arguments and register nothing.
//!
//! The join strategies live in their own modules:
//!
//! | Operator             | Module        |
//! |----------------------|---------------|
//! | `AlignedMerge`       | [`aligned`]   |
//! | `BroadcastJoin`      | [`broadcast`] |
//! | `ServiceShuffleJoin` | [`service`]   |
//! | task `Shuffle`       | [`shuffle`]   |
//!
//! A plan that still contains an abstract join is rejected: lower it first.

pub mod aligned;
pub mod broadcast;
pub mod service;
pub mod shuffle;

use crate::divisions::{boundary_order, contiguous_groups, split_counts};
use crate::error::{PlanError, PlanResult};
use crate::expr::{FrameOp, Operator, RepartitionSpec, ScalarOp};
use crate::plan::PlanRef;
use crate::session::Session;
use crate::task::{Task, TaskArg, TaskCall, TaskGraph, TaskKey};
use std::cmp::Ordering;
use tracing::debug;

/// Emit the recipes for every partition of a lowered plan.
pub fn build_task_graph(session: &Session, root: &PlanRef) -> PlanResult<TaskGraph> {
    let mut emitter = Emitter {
        session,
        graph: TaskGraph::new(),
    };
    for node in root.post_order() {
        emitter.emit(&node)?;
    }
    if matches!(root.op(), Operator::Scalar(ScalarOp::Literal(_))) {
        return Err(PlanError::InvalidPlan(
            "a literal has no partitions to compute".to_string(),
        ));
    }
    let n = session.npartitions(root)?;
    emitter.graph.outputs = (0..n).map(|i| TaskKey::partition(root.name(), i)).collect();
    debug!(
        "Emitted {} tasks for {} ({} output partitions)",
        emitter.graph.len(),
        root.name(),
        n
    );
    Ok(emitter.graph)
}

/// Shared state of one emission run.
pub(crate) struct Emitter<'a> {
    pub session: &'a Session,
    pub graph: TaskGraph,
}

impl<'a> Emitter<'a> {
    fn emit(&mut self, node: &PlanRef) -> PlanResult<()> {
        match node.op() {
            Operator::Scalar(ScalarOp::Literal(_)) => Ok(()),
            Operator::Scalar(ScalarOp::Binop(op)) => self.blockwise(node, TaskCall::Binop(*op)),
            Operator::Scalar(ScalarOp::Unaryop(op)) => self.blockwise(node, TaskCall::Unaryop(*op)),
            Operator::Scalar(ScalarOp::IsIn(values)) => {
                self.blockwise(node, TaskCall::IsIn(values.clone()))
            }
            Operator::Scalar(ScalarOp::Function(name)) => {
                self.blockwise(node, TaskCall::Function(name.clone()))
            }
            Operator::Frame(frame) => match frame {
                FrameOp::Source { name, divisions, .. } => {
                    for i in 0..divisions.npartitions() {
                        self.graph.insert(
                            TaskKey::partition(node.name(), i),
                            Task::new(
                                TaskCall::ReadPartition {
                                    source: name.clone(),
                                    partition: i,
                                },
                                vec![],
                            ),
                        );
                    }
                    Ok(())
                }
                FrameOp::Projection { columns } => self.blockwise(
                    node,
                    TaskCall::Project {
                        columns: columns.clone(),
                    },
                ),
                FrameOp::Index => self.blockwise(node, TaskCall::Index),
                FrameOp::Filter => self.blockwise(node, TaskCall::Filter),
                FrameOp::DropDuplicates { on } => {
                    self.blockwise(node, TaskCall::DropDuplicates { on: on.clone() })
                }
                FrameOp::Repartition(RepartitionSpec::Divisions { force, .. }) => {
                    self.repartition_divisions(node, *force)
                }
                FrameOp::Repartition(RepartitionSpec::Partitions(n)) => {
                    self.repartition_npartitions(node, *n)
                }
                FrameOp::Shuffle {
                    on,
                    npartitions_out,
                } => shuffle::emit(self, node, on, *npartitions_out),
            },
            Operator::Physical(_) if node.inputs().len() != 2 => Err(PlanError::InvalidPlan(
                format!("{} expects 2 inputs", node.op()),
            )),
            Operator::Physical(crate::expr::PhysicalJoin::AlignedMerge { spec }) => {
                aligned::emit(self, node, spec)
            }
            Operator::Physical(crate::expr::PhysicalJoin::Broadcast {
                spec,
                side,
                split_on,
            }) => broadcast::emit(self, node, spec, *side, split_on),
            Operator::Physical(crate::expr::PhysicalJoin::ServiceShuffle {
                spec,
                left_on,
                right_on,
                npartitions,
            }) => service::emit(self, node, spec, left_on, right_on, *npartitions),
            Operator::Logical(_) => Err(PlanError::InvalidPlan(format!(
                "{} must be lowered before emitting tasks",
                node.op()
            ))),
        }
    }

    /// Argument for partition `i` of `input`. A single-partition input serves
    /// every partition; a literal is inlined.
    pub fn arg(&self, input: &PlanRef, i: usize) -> PlanResult<TaskArg> {
        if let Operator::Scalar(ScalarOp::Literal(value)) = input.op() {
            return Ok(TaskArg::Literal(value.clone()));
        }
        let n = self.session.npartitions(input)?;
        let i = if n == 1 { 0 } else { i };
        if i >= n {
            return Err(PlanError::InvalidPlan(format!(
                "{} has {} partitions, partition {} requested",
                input.name(),
                n,
                i
            )));
        }
        Ok(TaskArg::Key(TaskKey::partition(input.name(), i)))
    }

    /// One task per output partition applying `call` to the matching input
    /// partitions.
    fn blockwise(&mut self, node: &PlanRef, call: TaskCall) -> PlanResult<()> {
        let n = self.session.npartitions(node)?;
        for i in 0..n {
            let args = node
                .inputs()
                .iter()
                .map(|input| self.arg(input, i))
                .collect::<PlanResult<Vec<_>>>()?;
            self.graph.insert(
                TaskKey::partition(node.name(), i),
                Task::new(call.clone(), args),
            );
        }
        Ok(())
    }

    /// Slice every overlapping input partition into each output range. Inputs
    /// with unknown boundaries are all considered overlapping.
    fn repartition_divisions(&mut self, node: &PlanRef, force: bool) -> PlanResult<()> {
        let input = single_input(node)?;
        let target = self.session.divisions(node)?;
        let source = self.session.divisions(input)?;
        if !target.is_known() {
            return Err(PlanError::InvalidPlan(format!(
                "repartition to unknown divisions {}",
                target
            )));
        }
        if !force && source == target {
            return self.blockwise(node, TaskCall::Concat);
        }
        let bounds = target.values();
        let n_out = target.npartitions();
        let n_in = source.npartitions();
        for j in 0..n_out {
            let (lower, upper) = (&bounds[j], &bounds[j + 1]);
            let mut sliced: Vec<usize> = (0..n_in)
                .filter(|i| !source.is_known() || overlaps(source.values(), *i, lower, upper))
                .collect();
            if sliced.is_empty() {
                // outside the input's extent: slice the nearest partition to nothing
                if n_in == 0 {
                    return Err(PlanError::InvalidPlan(format!(
                        "repartition of {} without partitions",
                        input.name()
                    )));
                }
                let below = boundary_order(lower, &source.values()[0]) == Ordering::Less;
                sliced.push(if below { 0 } else { n_in - 1 });
            }
            let args: Vec<TaskArg> = sliced
                .into_iter()
                .map(|i| TaskArg::Key(TaskKey::partition(input.name(), i)))
                .collect();
            self.graph.insert(
                TaskKey::partition(node.name(), j),
                Task::new(
                    TaskCall::SliceDivisions {
                        lower: lower.clone(),
                        upper: upper.clone(),
                        closed: j + 1 == n_out,
                    },
                    args,
                ),
            );
        }
        Ok(())
    }

    /// Concatenate contiguous groups when shrinking, split by row position when
    /// growing.
    fn repartition_npartitions(&mut self, node: &PlanRef, n_out: usize) -> PlanResult<()> {
        if n_out == 0 {
            return Err(PlanError::InvalidPlan(
                "repartition to zero partitions".to_string(),
            ));
        }
        let input = single_input(node)?;
        let n_in = self.session.npartitions(input)?;
        if n_out <= n_in {
            for (j, group) in contiguous_groups(n_in, n_out).into_iter().enumerate() {
                let args = group
                    .map(|i| TaskArg::Key(TaskKey::partition(input.name(), i)))
                    .collect();
                self.graph.insert(
                    TaskKey::partition(node.name(), j),
                    Task::new(TaskCall::Concat, args),
                );
            }
            return Ok(());
        }
        let mut j = 0;
        for (i, pieces) in split_counts(n_in, n_out).into_iter().enumerate() {
            for piece in 0..pieces {
                self.graph.insert(
                    TaskKey::partition(node.name(), j),
                    Task::new(
                        TaskCall::SplitRows { pieces, piece },
                        vec![TaskArg::Key(TaskKey::partition(input.name(), i))],
                    ),
                );
                j += 1;
            }
        }
        Ok(())
    }
}

fn single_input(node: &PlanRef) -> PlanResult<&PlanRef> {
    node.input(0)
        .ok_or_else(|| PlanError::InvalidPlan(format!("{} has no input", node.op())))
}

/// Whether input partition `i` of `bounds` can hold rows in `[lower, upper]`.
fn overlaps(
    bounds: &[crate::expr::ScalarValue],
    i: usize,
    lower: &crate::expr::ScalarValue,
    upper: &crate::expr::ScalarValue,
) -> bool {
    let starts_before_end = !matches!(bounds[i].compare(upper), Some(Ordering::Greater));
    let ends_after_start = !matches!(bounds[i + 1].compare(lower), Some(Ordering::Less));
    starts_before_end && ends_after_start
}
