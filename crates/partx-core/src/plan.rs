//! # Content-Addressed Plan Nodes
//!
//! A plan is a DAG of immutable [`PlanNode`]s shared through `Arc`. A node's
//! identity is a 64-bit hash of its operator value and the identities of its
//! inputs, so two structurally identical subtrees have the same [`NodeId`] no
//! matter how they were built. Derived properties are memoized per identity by
//! the planning [`Session`](crate::session::Session).
//!
//! Nodes are never mutated. Rewrites build new nodes through the session and
//! return a new root.

use crate::expr::{
    FrameOp, LogicalJoin, OpKind, Operator, PhysicalJoin, RepartitionSpec, ScalarOp,
};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Write;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Deterministic identity of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub type PlanRef = Arc<PlanNode>;

/// An immutable node in the plan DAG.
#[derive(Debug)]
pub struct PlanNode {
    id: NodeId,
    op: Operator,
    inputs: Vec<PlanRef>,
}

impl PlanNode {
    /// Build a node and compute its identity. Prefer `Session::node`, which also
    /// collapses the node onto an existing identical one.
    pub fn new(op: Operator, inputs: Vec<PlanRef>) -> PlanNode {
        let mut hasher = DefaultHasher::new();
        op.hash(&mut hasher);
        inputs.len().hash(&mut hasher);
        for input in &inputs {
            input.id.hash(&mut hasher);
        }
        PlanNode {
            id: NodeId(hasher.finish()),
            op,
            inputs,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    /// Direct dependencies of the node, in operand order.
    pub fn inputs(&self) -> &[PlanRef] {
        &self.inputs
    }

    pub fn input(&self, i: usize) -> Option<&PlanRef> {
        self.inputs.get(i)
    }

    /// Name under which the node's partitions are registered in a task graph.
    pub fn name(&self) -> String {
        format!("{}-{}", self.kind().label(), self.id)
    }

    /// Whether any direct input has identity `id`.
    pub fn depends_on(&self, id: NodeId) -> bool {
        self.inputs.iter().any(|i| i.id == id)
    }

    /// Indented tree rendering. Shared subtrees are printed once.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let mut seen = HashSet::new();
        self.explain_into(&mut out, 0, &mut seen);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize, seen: &mut HashSet<NodeId>) {
        let _ = write!(out, "{}{}", "  ".repeat(depth), self.op);
        if !seen.insert(self.id) && !self.inputs.is_empty() {
            let _ = writeln!(out, " (see {})", self.id);
            return;
        }
        let _ = writeln!(out);
        for input in &self.inputs {
            input.explain_into(out, depth + 1, seen);
        }
    }

    /// Every node reachable from this one, inputs before the nodes that use them.
    pub fn post_order(self: &Arc<Self>) -> Vec<PlanRef> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<(PlanRef, bool)> = vec![(Arc::clone(self), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !seen.insert(node.id) {
                continue;
            }
            stack.push((Arc::clone(&node), true));
            for input in node.inputs.iter().rev() {
                if !seen.contains(&input.id) {
                    stack.push((Arc::clone(input), false));
                }
            }
        }
        order
    }
}

/// The nodes of one plan that read each node, keyed by the read node's identity.
#[derive(Debug, Default)]
pub struct Consumers(HashMap<NodeId, Vec<PlanRef>>);

impl Consumers {
    pub fn of_plan(root: &PlanRef) -> Self {
        let mut readers: HashMap<NodeId, Vec<PlanRef>> = HashMap::new();
        for node in root.post_order() {
            let mut inputs: Vec<NodeId> = node.inputs.iter().map(|i| i.id).collect();
            inputs.sort();
            inputs.dedup();
            for input in inputs {
                readers.entry(input).or_default().push(Arc::clone(&node));
            }
        }
        Self(readers)
    }

    /// Readers of `id`. Empty for the root and for nodes outside the plan.
    pub fn of(&self, id: NodeId) -> &[PlanRef] {
        self.0.get(&id).map(|r| r.as_slice()).unwrap_or(&[])
    }
}

impl PartialEq for PlanNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PlanNode {}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Scalar(s) => match s {
                ScalarOp::Literal(v) => write!(f, "Literal({})", v),
                ScalarOp::Binop(op) => write!(f, "Binop({})", op.symbol()),
                ScalarOp::Unaryop(op) => write!(f, "Unaryop({:?})", op),
                ScalarOp::IsIn(values) => write!(f, "IsIn({} values)", values.len()),
                ScalarOp::Function(name) => write!(f, "Function({})", name),
            },
            Operator::Frame(fr) => match fr {
                FrameOp::Source {
                    name, divisions, ..
                } => write!(f, "Source({}, npartitions={})", name, divisions.npartitions()),
                FrameOp::Projection { columns } => write!(f, "Projection[{}]", columns.join(", ")),
                FrameOp::Index => write!(f, "Index"),
                FrameOp::Filter => write!(f, "Filter"),
                FrameOp::Repartition(RepartitionSpec::Partitions(n)) => {
                    write!(f, "Repartition(npartitions={})", n)
                }
                FrameOp::Repartition(RepartitionSpec::Divisions { divisions, force }) => {
                    write!(f, "Repartition(divisions={}, force={})", divisions, force)
                }
                FrameOp::Shuffle {
                    on,
                    npartitions_out,
                } => write!(f, "Shuffle(on={}, npartitions={})", on, npartitions_out),
                FrameOp::DropDuplicates { on } => write!(f, "DropDuplicates(on={})", on),
            },
            Operator::Logical(l) => match l {
                LogicalJoin::Merge { spec, .. } => write!(f, "Merge({})", spec),
                LogicalJoin::SemiMerge { spec, .. } => write!(f, "SemiMerge({})", spec),
                LogicalJoin::JoinRecursive { how } => write!(f, "JoinRecursive(how={})", how),
            },
            Operator::Physical(p) => match p {
                PhysicalJoin::AlignedMerge { spec } => write!(f, "AlignedMerge({})", spec),
                PhysicalJoin::Broadcast { spec, side, .. } => {
                    write!(f, "BroadcastJoin({}, broadcast={:?})", spec, side)
                }
                PhysicalJoin::ServiceShuffle {
                    spec, npartitions, ..
                } => match npartitions {
                    Some(n) => write!(f, "ServiceShuffleJoin({}, npartitions={})", spec, n),
                    None => write!(f, "ServiceShuffleJoin({})", spec),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarValue;

    fn literal(v: i64) -> PlanRef {
        Arc::new(PlanNode::new(
            Operator::Scalar(ScalarOp::Literal(ScalarValue::from(v))),
            vec![],
        ))
    }

    #[test]
    fn test_identity_is_structural() {
        let a = PlanNode::new(
            Operator::Scalar(ScalarOp::Binop(crate::expr::BinaryOp::Add)),
            vec![literal(1), literal(2)],
        );
        let b = PlanNode::new(
            Operator::Scalar(ScalarOp::Binop(crate::expr::BinaryOp::Add)),
            vec![literal(1), literal(2)],
        );
        let swapped = PlanNode::new(
            Operator::Scalar(ScalarOp::Binop(crate::expr::BinaryOp::Add)),
            vec![literal(2), literal(1)],
        );
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), swapped.id());
        assert!(a.name().starts_with("binop-"));
        assert_eq!(a.name().len(), "binop-".len() + 16);
    }

    #[test]
    fn test_post_order_visits_shared_nodes_once() {
        let one = literal(1);
        let sum = Arc::new(PlanNode::new(
            Operator::Scalar(ScalarOp::Binop(crate::expr::BinaryOp::Add)),
            vec![Arc::clone(&one), Arc::clone(&one)],
        ));
        let order = sum.post_order();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].id(), one.id());
        assert_eq!(order[1].id(), sum.id());
    }

    #[test]
    fn test_consumers_list_each_reader_once() {
        let one = literal(1);
        let two = literal(2);
        let sum = Arc::new(PlanNode::new(
            Operator::Scalar(ScalarOp::Binop(crate::expr::BinaryOp::Add)),
            vec![Arc::clone(&one), Arc::clone(&one)],
        ));
        let root = Arc::new(PlanNode::new(
            Operator::Scalar(ScalarOp::Binop(crate::expr::BinaryOp::Mul)),
            vec![Arc::clone(&sum), Arc::clone(&one)],
        ));
        let consumers = Consumers::of_plan(&root);
        let readers: Vec<NodeId> = consumers.of(one.id()).iter().map(|n| n.id()).collect();
        assert_eq!(readers, vec![sum.id(), root.id()]);
        assert!(consumers.of(root.id()).is_empty());
        assert!(consumers.of(two.id()).is_empty());
    }
}
