//! # Planning Session
//!
//! The session is the expression substrate the join layer plans against. It
//! interns plan nodes by identity, so structurally identical subtrees collapse to
//! one shared node, and it memoizes every derived property (sample schema,
//! divisions, join properties, merge layout) in tables keyed by [`NodeId`].
//!
//! A session is scoped to one planning run and is single-threaded: the caches
//! use `RefCell` and the session is not `Sync`. Planning performs no I/O.
//!
//! ## Derived Properties
//!
//! | Property        | Method                     |
//! |-----------------|----------------------------|
//! | sample schema   | [`Session::meta`]          |
//! | column names    | [`Session::columns`]       |
//! | divisions       | [`Session::divisions`]     |
//! | partition count | [`Session::npartitions`]   |
//! | join view       | [`Session::join_properties`] |
//! | merge layout    | [`Session::merge_layout`]  |

use crate::config::PlannerConfig;
use crate::divisions::{contiguous_groups, Divisions};
use crate::error::{PlanError, PlanResult};
use crate::expr::{
    DataType, FrameOp, JoinSide, LogicalJoin, Operator, PhysicalJoin, RepartitionSpec, ScalarOp,
    UnaryOp,
};
use crate::join::{self, JoinProperties};
use crate::plan::{NodeId, PlanNode, PlanRef};
use crate::schema::{Field, IndexField, MergeLayout, Schema};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Interning table and property caches for one planning run.
pub struct Session {
    config: PlannerConfig,
    nodes: RefCell<HashMap<NodeId, PlanRef>>,
    meta: RefCell<HashMap<NodeId, Schema>>,
    divisions: RefCell<HashMap<NodeId, Divisions>>,
    joins: RefCell<HashMap<NodeId, JoinProperties>>,
    layouts: RefCell<HashMap<NodeId, MergeLayout>>,
}

impl Session {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            nodes: RefCell::new(HashMap::new()),
            meta: RefCell::new(HashMap::new()),
            divisions: RefCell::new(HashMap::new()),
            joins: RefCell::new(HashMap::new()),
            layouts: RefCell::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Number of distinct nodes interned so far.
    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Intern a node, returning the existing node when one with the same identity
    /// was already built.
    pub fn node(&self, op: Operator, inputs: Vec<PlanRef>) -> PlanRef {
        let node = PlanNode::new(op, inputs);
        let id = node.id();
        let mut nodes = self.nodes.borrow_mut();
        Arc::clone(nodes.entry(id).or_insert_with(|| Arc::new(node)))
    }

    /// Same operator over new inputs. Returns `node` itself when nothing changed.
    pub fn with_inputs(&self, node: &PlanRef, inputs: Vec<PlanRef>) -> PlanRef {
        let unchanged = inputs.len() == node.inputs().len()
            && inputs
                .iter()
                .zip(node.inputs())
                .all(|(a, b)| a.id() == b.id());
        if unchanged {
            return Arc::clone(node);
        }
        self.node(node.op().clone(), inputs)
    }

    /// Replace every occurrence of `old` below (and including) `root` by `new`.
    ///
    /// Pure rebuild: untouched subtrees are shared, rebuilt ones are interned.
    pub fn substitute(&self, root: &PlanRef, old: &PlanRef, new: &PlanRef) -> PlanRef {
        let mut memo: HashMap<NodeId, PlanRef> = HashMap::new();
        self.substitute_rec(root, old.id(), new, &mut memo)
    }

    fn substitute_rec(
        &self,
        node: &PlanRef,
        old: NodeId,
        new: &PlanRef,
        memo: &mut HashMap<NodeId, PlanRef>,
    ) -> PlanRef {
        if node.id() == old {
            return Arc::clone(new);
        }
        if let Some(done) = memo.get(&node.id()) {
            return Arc::clone(done);
        }
        let inputs: Vec<PlanRef> = node
            .inputs()
            .iter()
            .map(|i| self.substitute_rec(i, old, new, memo))
            .collect();
        let rebuilt = self.with_inputs(node, inputs);
        memo.insert(node.id(), Arc::clone(&rebuilt));
        rebuilt
    }

    // ------------------------------------------------------------------
    // Sample schema
    // ------------------------------------------------------------------

    /// Zero-row sample schema of a node. Schema errors surface here, at planning
    /// time.
    pub fn meta(&self, node: &PlanRef) -> PlanResult<Schema> {
        if let Some(schema) = self.meta.borrow().get(&node.id()) {
            return Ok(schema.clone());
        }
        let schema = self.compute_meta(node)?;
        self.meta.borrow_mut().insert(node.id(), schema.clone());
        Ok(schema)
    }

    pub fn columns(&self, node: &PlanRef) -> PlanResult<Vec<String>> {
        Ok(self.meta(node)?.column_names())
    }

    fn compute_meta(&self, node: &PlanRef) -> PlanResult<Schema> {
        match node.op() {
            Operator::Scalar(ScalarOp::Literal(value)) => {
                expect_arity(node, 0)?;
                let dtype = value.data_type().unwrap_or(DataType::Float64);
                Ok(Schema::new(vec![], IndexField::unnamed(dtype)))
            }
            Operator::Scalar(ScalarOp::Binop(op)) => {
                expect_arity(node, 2)?;
                let base = self.meta(self.frame_operand(node)?)?;
                Ok(if op.is_predicate() { as_bool(base) } else { base })
            }
            Operator::Scalar(ScalarOp::Unaryop(op)) => {
                expect_arity(node, 1)?;
                let base = self.meta(&node.inputs()[0])?;
                Ok(match op {
                    UnaryOp::Neg => base,
                    UnaryOp::Not | UnaryOp::IsNull | UnaryOp::NotNull => as_bool(base),
                })
            }
            Operator::Scalar(ScalarOp::IsIn(_)) => {
                expect_arity(node, 1)?;
                Ok(as_bool(self.meta(&node.inputs()[0])?))
            }
            Operator::Scalar(ScalarOp::Function(_)) => {
                expect_arity(node, 1)?;
                self.meta(&node.inputs()[0])
            }
            Operator::Frame(frame) => match frame {
                FrameOp::Source { schema, .. } => {
                    expect_arity(node, 0)?;
                    Ok(schema.clone())
                }
                FrameOp::Projection { columns } => {
                    expect_arity(node, 1)?;
                    self.meta(&node.inputs()[0])?.project(columns)
                }
                FrameOp::Index => {
                    expect_arity(node, 1)?;
                    Ok(self.meta(&node.inputs()[0])?.index_only())
                }
                FrameOp::Filter => {
                    expect_arity(node, 2)?;
                    // validate the predicate too
                    self.meta(&node.inputs()[1])?;
                    self.meta(&node.inputs()[0])
                }
                FrameOp::Repartition(_)
                | FrameOp::Shuffle { .. }
                | FrameOp::DropDuplicates { .. } => {
                    expect_arity(node, 1)?;
                    self.meta(&node.inputs()[0])
                }
            },
            Operator::Logical(LogicalJoin::JoinRecursive { how }) => {
                let reduced = join::reduce_join_recursive(self, node.inputs(), *how)?;
                self.meta(&reduced)
            }
            Operator::Logical(_) | Operator::Physical(_) => {
                Ok(self.merge_layout(node)?.schema)
            }
        }
    }

    /// Output layout of a two-input join node, from the merge rule.
    pub fn merge_layout(&self, node: &PlanRef) -> PlanResult<MergeLayout> {
        if let Some(layout) = self.layouts.borrow().get(&node.id()) {
            return Ok(layout.clone());
        }
        let spec = node.op().join_spec().ok_or_else(|| {
            PlanError::InvalidPlan(format!("{} is not a two-table join", node.op()))
        })?;
        expect_arity(node, 2)?;
        let left = self.meta(&node.inputs()[0])?;
        let right = self.meta(&node.inputs()[1])?;
        let layout = MergeLayout::derive(&left, &right, spec)?;
        self.layouts.borrow_mut().insert(node.id(), layout.clone());
        Ok(layout)
    }

    // ------------------------------------------------------------------
    // Divisions
    // ------------------------------------------------------------------

    pub fn divisions(&self, node: &PlanRef) -> PlanResult<Divisions> {
        if let Some(divisions) = self.divisions.borrow().get(&node.id()) {
            return Ok(divisions.clone());
        }
        let divisions = self.compute_divisions(node)?;
        trace!("divisions of {}: {}", node.name(), divisions);
        self.divisions
            .borrow_mut()
            .insert(node.id(), divisions.clone());
        Ok(divisions)
    }

    pub fn npartitions(&self, node: &PlanRef) -> PlanResult<usize> {
        Ok(self.divisions(node)?.npartitions())
    }

    pub fn known_divisions(&self, node: &PlanRef) -> PlanResult<bool> {
        Ok(self.divisions(node)?.is_known())
    }

    fn compute_divisions(&self, node: &PlanRef) -> PlanResult<Divisions> {
        match node.op() {
            Operator::Scalar(ScalarOp::Literal(_)) => Ok(Divisions::unknown(1)),
            Operator::Scalar(_) => self.divisions(self.frame_operand(node)?),
            Operator::Frame(frame) => match frame {
                FrameOp::Source { divisions, .. } => Ok(divisions.clone()),
                FrameOp::Projection { .. }
                | FrameOp::Index
                | FrameOp::Filter
                | FrameOp::DropDuplicates { .. } => self.divisions(input(node, 0)?),
                FrameOp::Repartition(RepartitionSpec::Divisions { divisions, .. }) => {
                    Ok(divisions.clone())
                }
                FrameOp::Repartition(RepartitionSpec::Partitions(n)) => {
                    let upstream = self.divisions(input(node, 0)?)?;
                    let n_in = upstream.npartitions();
                    if upstream.is_known() && *n > 0 && *n <= n_in {
                        let values = upstream.values();
                        let mut out: Vec<_> = contiguous_groups(n_in, *n)
                            .iter()
                            .map(|g| values[g.start].clone())
                            .collect();
                        out.push(values[n_in].clone());
                        Divisions::new(out)
                    } else {
                        Ok(Divisions::unknown(*n))
                    }
                }
                FrameOp::Shuffle {
                    npartitions_out, ..
                } => Ok(Divisions::unknown(*npartitions_out)),
            },
            Operator::Logical(LogicalJoin::JoinRecursive { how }) => {
                let reduced = join::reduce_join_recursive(self, node.inputs(), *how)?;
                self.divisions(&reduced)
            }
            Operator::Logical(_) => Ok(self.join_properties(node)?.divisions),
            Operator::Physical(PhysicalJoin::AlignedMerge { spec }) => {
                join::aligned_divisions(self, node, spec)
            }
            Operator::Physical(PhysicalJoin::Broadcast { side, .. }) => {
                let streaming = match side.other() {
                    JoinSide::Left => input(node, 0)?,
                    JoinSide::Right => input(node, 1)?,
                };
                // boundaries carry over only when the result keeps the streaming index
                if self.meta(streaming)?.index.name == self.meta(node)?.index.name {
                    self.divisions(streaming)
                } else {
                    Ok(Divisions::unknown(self.npartitions(streaming)?))
                }
            }
            Operator::Physical(PhysicalJoin::ServiceShuffle { npartitions, .. }) => {
                let n = match npartitions {
                    Some(n) => *n,
                    None => self
                        .npartitions(input(node, 0)?)?
                        .max(self.npartitions(input(node, 1)?)?),
                };
                Ok(Divisions::unknown(n))
            }
        }
    }

    // ------------------------------------------------------------------
    // Joins
    // ------------------------------------------------------------------

    /// Memoized property view of an abstract `Merge`/`SemiMerge` node.
    pub fn join_properties(&self, node: &PlanRef) -> PlanResult<JoinProperties> {
        if let Some(props) = self.joins.borrow().get(&node.id()) {
            return Ok(props.clone());
        }
        let props = JoinProperties::derive(self, node)?;
        self.joins.borrow_mut().insert(node.id(), props.clone());
        Ok(props)
    }

    /// The operand that carries the frame shape of an elementwise node: the first
    /// input that is not a literal.
    pub fn frame_operand<'a>(&self, node: &'a PlanRef) -> PlanResult<&'a PlanRef> {
        node.inputs()
            .iter()
            .find(|i| !matches!(i.op(), Operator::Scalar(ScalarOp::Literal(_))))
            .ok_or_else(|| {
                PlanError::InvalidPlan(format!("{} has no frame operand", node.op()))
            })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

fn expect_arity(node: &PlanNode, n: usize) -> PlanResult<()> {
    if node.inputs().len() != n {
        return Err(PlanError::InvalidPlan(format!(
            "{} expects {} inputs, got {}",
            node.op(),
            n,
            node.inputs().len()
        )));
    }
    Ok(())
}

fn input(node: &PlanNode, i: usize) -> PlanResult<&PlanRef> {
    node.input(i).ok_or_else(|| {
        PlanError::InvalidPlan(format!("{} is missing input {}", node.op(), i))
    })
}

fn as_bool(schema: Schema) -> Schema {
    let columns = schema
        .columns
        .into_iter()
        .map(|f| Field::new(f.name, DataType::Bool))
        .collect();
    Schema::new(columns, schema.index)
}
