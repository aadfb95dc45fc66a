//! Single-threaded reference executor for task graphs.

use crate::error::{PlanError, PlanResult};
use crate::expr::{BinaryOp, ScalarValue, UnaryOp};
use crate::local::frame::Frame;
use crate::local::merge::merge_frames;
use crate::local::service::InMemoryShuffleService;
use crate::task::{ShuffleService, Task, TaskArg, TaskCall, TaskGraph, TaskKey};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of one task.
#[derive(Debug, Clone)]
enum Value {
    Frame(Frame),
    Buckets(Vec<Frame>),
    Unit,
}

/// Runs task graphs against registered in-memory tables.
///
/// A failing task cancels every shuffle session the graph opens and the run
/// returns only the error; partial output is never returned.
pub struct LocalExecutor {
    sources: HashMap<String, Vec<Frame>>,
    service: Arc<dyn ShuffleService + Send + Sync>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::with_service(Arc::new(InMemoryShuffleService::new()))
    }

    pub fn with_service(service: Arc<dyn ShuffleService + Send + Sync>) -> Self {
        Self {
            sources: HashMap::new(),
            service,
        }
    }

    /// Register the partitions of a source table.
    pub fn register(&mut self, name: &str, partitions: Vec<Frame>) {
        self.sources.insert(name.to_string(), partitions);
    }

    /// Compute every output partition of `graph`.
    pub fn execute(&self, graph: &TaskGraph) -> PlanResult<Vec<Frame>> {
        graph.validate()?;
        let mut results: HashMap<TaskKey, Value> = HashMap::new();
        let outcome = graph
            .outputs
            .iter()
            .map(|key| match self.eval(graph, key, &mut results)? {
                Value::Frame(f) => Ok(f),
                _ => Err(PlanError::Execution(format!("{} is not a partition", key))),
            })
            .collect::<PlanResult<Vec<_>>>();
        if let Err(err) = &outcome {
            let tokens = shuffle_tokens(graph);
            debug!(
                "Execution failed ({}); cancelling {} shuffle sessions",
                err,
                tokens.len()
            );
            for token in tokens {
                self.service.cancel(&token);
            }
        }
        outcome
    }

    /// Execute and concatenate all output partitions.
    pub fn collect(&self, graph: &TaskGraph) -> PlanResult<Frame> {
        Frame::concat(&self.execute(graph)?)
    }

    fn eval(
        &self,
        graph: &TaskGraph,
        key: &TaskKey,
        results: &mut HashMap<TaskKey, Value>,
    ) -> PlanResult<Value> {
        if let Some(v) = results.get(key) {
            return Ok(v.clone());
        }
        let task = graph
            .get(key)
            .ok_or_else(|| PlanError::MissingTask(key.to_string()))?;
        let mut args = Vec::with_capacity(task.args.len());
        for arg in &task.args {
            args.push(match arg {
                TaskArg::Key(k) => Arg::Value(self.eval(graph, k, results)?),
                TaskArg::Item(k, j) => match self.eval(graph, k, results)? {
                    Value::Buckets(mut b) if *j < b.len() => {
                        Arg::Value(Value::Frame(b.swap_remove(*j)))
                    }
                    _ => {
                        return Err(PlanError::Execution(format!(
                            "{} has no bucket {}",
                            k, j
                        )))
                    }
                },
                TaskArg::Literal(v) => Arg::Literal(v.clone()),
            });
        }
        trace!("running {}", key);
        let value = self.run(key, task, args)?;
        results.insert(key.clone(), value.clone());
        Ok(value)
    }

    fn run(&self, key: &TaskKey, task: &Task, args: Vec<Arg>) -> PlanResult<Value> {
        let value = match &task.call {
            TaskCall::ReadPartition { source, partition } => {
                let parts = self
                    .sources
                    .get(source)
                    .ok_or_else(|| PlanError::Execution(format!("unknown source '{}'", source)))?;
                let part = parts.get(*partition).ok_or_else(|| {
                    PlanError::Execution(format!(
                        "source '{}' has no partition {}",
                        source, partition
                    ))
                })?;
                Value::Frame(part.clone())
            }
            TaskCall::Project { columns } => Value::Frame(frame_arg(&args, 0)?.project(columns)?),
            TaskCall::Index => Value::Frame(frame_arg(&args, 0)?.index_frame()),
            TaskCall::Filter => Value::Frame(frame_arg(&args, 0)?.filter(frame_arg(&args, 1)?)?),
            TaskCall::Binop(op) => Value::Frame(binop(*op, &args)?),
            TaskCall::Unaryop(op) => {
                Value::Frame(map_values(frame_arg(&args, 0)?, |v| unaryop(*op, v))?)
            }
            TaskCall::IsIn(values) => {
                let wanted: Vec<ScalarValue> = values.iter().map(|v| v.hash_key()).collect();
                Value::Frame(map_values(frame_arg(&args, 0)?, |v| {
                    Ok(ScalarValue::Bool(!v.is_null() && wanted.contains(&v.hash_key())))
                })?)
            }
            TaskCall::Function(name) => Value::Frame(function(name, frame_arg(&args, 0)?)?),
            TaskCall::DropDuplicates { on } => {
                Value::Frame(frame_arg(&args, 0)?.drop_duplicates(on)?)
            }
            TaskCall::Concat => Value::Frame(Frame::concat(&frame_args(&args)?)?),
            TaskCall::SliceDivisions {
                lower,
                upper,
                closed,
            } => {
                let all = Frame::concat(&frame_args(&args)?)?;
                Value::Frame(all.slice_index(lower, upper, *closed))
            }
            TaskCall::SplitRows { pieces, piece } => {
                Value::Frame(frame_arg(&args, 0)?.split_rows(*pieces, *piece))
            }
            TaskCall::HashSplit { on, buckets } => {
                Value::Buckets(frame_arg(&args, 0)?.hash_split(on, *buckets)?)
            }
            TaskCall::Barrier => Value::Unit,
            TaskCall::CollectBucket { .. } => {
                // the first argument is the barrier
                let parts: Vec<Frame> = frame_args(&args[1.min(args.len())..])?;
                Value::Frame(Frame::concat(&parts)?)
            }
            TaskCall::MergeChunk { spec, layout } => Value::Frame(merge_frames(
                frame_arg(&args, 0)?,
                frame_arg(&args, 1)?,
                spec,
                layout,
            )?),
            TaskCall::ShuffleTransfer {
                token,
                input_partition,
                npartitions_out,
                on,
            } => {
                let part = frame_arg(&args, 0)?.clone();
                self.service
                    .transfer(token, *input_partition, *npartitions_out, on, part)?;
                Value::Unit
            }
            TaskCall::ShuffleBarrier { token } => {
                self.service.barrier(token)?;
                Value::Unit
            }
            TaskCall::MergeUnpack {
                left_token,
                right_token,
                output_partition,
                spec,
                layout,
            } => {
                let left = self.service.unpack(left_token, *output_partition)?;
                let right = self.service.unpack(right_token, *output_partition)?;
                Value::Frame(merge_frames(&left, &right, spec, layout)?)
            }
        };
        if let Value::Frame(f) = &value {
            trace!("{} -> {} rows", key, f.num_rows());
        }
        Ok(value)
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

enum Arg {
    Value(Value),
    Literal(ScalarValue),
}

fn frame_arg(args: &[Arg], i: usize) -> PlanResult<&Frame> {
    match args.get(i) {
        Some(Arg::Value(Value::Frame(f))) => Ok(f),
        _ => Err(PlanError::Execution(format!("argument {} is not a partition", i))),
    }
}

fn frame_args(args: &[Arg]) -> PlanResult<Vec<Frame>> {
    (0..args.len())
        .map(|i| frame_arg(args, i).cloned())
        .collect()
}

fn shuffle_tokens(graph: &TaskGraph) -> BTreeSet<String> {
    graph
        .tasks
        .values()
        .filter_map(|t| match &t.call {
            TaskCall::ShuffleTransfer { token, .. } | TaskCall::ShuffleBarrier { token } => {
                Some(token.clone())
            }
            _ => None,
        })
        .collect()
}

fn map_values(
    frame: &Frame,
    f: impl Fn(&ScalarValue) -> PlanResult<ScalarValue>,
) -> PlanResult<Frame> {
    let rows = frame
        .rows
        .iter()
        .map(|r| r.iter().map(&f).collect::<PlanResult<Vec<_>>>())
        .collect::<PlanResult<Vec<_>>>()?;
    Frame::new(frame.columns.clone(), frame.index_name.clone(), frame.index.clone(), rows)
}

fn binop(op: BinaryOp, args: &[Arg]) -> PlanResult<Frame> {
    match (args.first(), args.get(1)) {
        (Some(Arg::Value(Value::Frame(l))), Some(Arg::Literal(v))) => {
            map_values(l, |x| apply_binop(op, x, v))
        }
        (Some(Arg::Literal(v)), Some(Arg::Value(Value::Frame(r)))) => {
            map_values(r, |x| apply_binop(op, v, x))
        }
        (Some(Arg::Value(Value::Frame(l))), Some(Arg::Value(Value::Frame(r)))) => {
            if l.num_rows() != r.num_rows() {
                return Err(PlanError::Execution(format!(
                    "binop over {} and {} rows",
                    l.num_rows(),
                    r.num_rows()
                )));
            }
            let null = ScalarValue::Null;
            let rows = l
                .rows
                .iter()
                .zip(&r.rows)
                .map(|(a, b)| {
                    a.iter()
                        .enumerate()
                        .map(|(c, x)| {
                            // a single-column right operand broadcasts across columns
                            let y = b.get(c).or_else(|| b.first()).unwrap_or(&null);
                            apply_binop(op, x, y)
                        })
                        .collect::<PlanResult<Vec<_>>>()
                })
                .collect::<PlanResult<Vec<_>>>()?;
            Frame::new(l.columns.clone(), l.index_name.clone(), l.index.clone(), rows)
        }
        _ => Err(PlanError::Execution("binop needs a partition operand".to_string())),
    }
}

fn apply_binop(op: BinaryOp, a: &ScalarValue, b: &ScalarValue) -> PlanResult<ScalarValue> {
    use ScalarValue::*;
    let cmp = a.compare(b);
    Ok(match op {
        BinaryOp::Eq => Bool(cmp == Some(Ordering::Equal)),
        BinaryOp::NotEq => Bool(matches!(cmp, Some(Ordering::Less | Ordering::Greater))),
        BinaryOp::Lt => Bool(cmp == Some(Ordering::Less)),
        BinaryOp::LtEq => Bool(matches!(cmp, Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => Bool(cmp == Some(Ordering::Greater)),
        BinaryOp::GtEq => Bool(matches!(cmp, Some(Ordering::Greater | Ordering::Equal))),
        BinaryOp::And => Bool(*a == Bool(true) && *b == Bool(true)),
        BinaryOp::Or => Bool(*a == Bool(true) || *b == Bool(true)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, a, b)?,
    })
}

fn arithmetic(op: BinaryOp, a: &ScalarValue, b: &ScalarValue) -> PlanResult<ScalarValue> {
    if let (ScalarValue::Int64(x), ScalarValue::Int64(y)) = (a, b) {
        let v = match op {
            BinaryOp::Add => x.checked_add(*y),
            BinaryOp::Sub => x.checked_sub(*y),
            BinaryOp::Mul => x.checked_mul(*y),
            _ => None,
        };
        if let Some(v) = v {
            return Ok(ScalarValue::Int64(v));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(ScalarValue::from(match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            _ => x / y,
        })),
        _ if a.is_null() || b.is_null() => Ok(ScalarValue::Null),
        _ => Err(PlanError::Execution(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            a,
            b
        ))),
    }
}

fn unaryop(op: UnaryOp, v: &ScalarValue) -> PlanResult<ScalarValue> {
    Ok(match (op, v) {
        (UnaryOp::IsNull, v) => ScalarValue::Bool(v.is_null()),
        (UnaryOp::NotNull, v) => ScalarValue::Bool(!v.is_null()),
        (UnaryOp::Not, ScalarValue::Bool(b)) => ScalarValue::Bool(!b),
        (UnaryOp::Neg, ScalarValue::Int64(i)) => ScalarValue::Int64(-i),
        (UnaryOp::Neg, ScalarValue::Float64(f)) => ScalarValue::from(-f.0),
        (_, ScalarValue::Null) => ScalarValue::Null,
        (op, v) => {
            return Err(PlanError::Execution(format!("cannot apply {:?} to {}", op, v)))
        }
    })
}

/// The named elementwise functions the reference executor knows.
fn function(name: &str, frame: &Frame) -> PlanResult<Frame> {
    match name {
        "abs" => map_values(frame, |v| {
            Ok(match v {
                ScalarValue::Int64(i) => ScalarValue::Int64(i.abs()),
                ScalarValue::Float64(f) => ScalarValue::from(f.0.abs()),
                other => other.clone(),
            })
        }),
        "identity" => Ok(frame.clone()),
        other => Err(PlanError::Execution(format!("unknown function '{}'", other))),
    }
}
