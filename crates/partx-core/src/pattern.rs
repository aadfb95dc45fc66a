//! # Declarative Pattern Matching for Plan Rules
//!
//! Each rule declares a `Pattern` describing the shape of plan it rewrites. The
//! rewrite and lowering drivers check the pattern before calling `apply()`, so a
//! rule's `apply` only ever sees nodes of the shape it asked for.
//!
//! ## Pattern Language
//!
//! - `Pattern::Operator(matcher, children)`: matches a node whose operator
//!   satisfies `matcher` and whose inputs match the child patterns one to one
//!   (the input count must agree). Used for structural matching such as "a Filter
//!   whose frame input is a join".
//!
//! - `Pattern::Op(matcher)`: matches the operator and ignores the inputs. Needed
//!   for variadic nodes such as `JoinRecursive`.
//!
//! - `Pattern::Any`: matches any node. The usual child pattern.
//!
//! - `Pattern::Leaf`: matches only nodes without inputs (sources, literals).

use crate::expr::{LogicalJoin, OpKind, Operator};
use crate::plan::PlanNode;

/// Pattern for matching plan nodes.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Match an operator with child patterns.
    Operator(OpMatcher, Vec<Pattern>),
    /// Match an operator with any inputs.
    Op(OpMatcher),
    /// Match any subtree.
    Any,
    /// Match a node without inputs.
    Leaf,
}

/// Matcher for operator types (without data).
#[derive(Debug, Clone)]
pub enum OpMatcher {
    Kind(OpKind),
    /// `Merge` or `SemiMerge`: the abstract two-table joins.
    TwoTableJoin,
    /// `Projection` or `Index`: operators that narrow a frame's columns.
    Selection,
    AnyLogical,
    AnyPhysical,
}

impl OpMatcher {
    fn matches(&self, op: &Operator) -> bool {
        match self {
            OpMatcher::Kind(kind) => op.kind() == *kind,
            OpMatcher::TwoTableJoin => matches!(
                op,
                Operator::Logical(LogicalJoin::Merge { .. } | LogicalJoin::SemiMerge { .. })
            ),
            OpMatcher::Selection => matches!(op.kind(), OpKind::Projection | OpKind::Index),
            OpMatcher::AnyLogical => op.is_logical(),
            OpMatcher::AnyPhysical => op.is_physical(),
        }
    }
}

impl Pattern {
    /// Match an abstract two-table join with two any-children.
    pub fn join() -> Self {
        Pattern::Operator(OpMatcher::TwoTableJoin, vec![Pattern::Any, Pattern::Any])
    }

    /// Match a `Merge` node.
    pub fn merge() -> Self {
        Pattern::Operator(OpMatcher::Kind(OpKind::Merge), vec![Pattern::Any, Pattern::Any])
    }

    /// Match a `SemiMerge` node.
    pub fn semi_merge() -> Self {
        Pattern::Operator(
            OpMatcher::Kind(OpKind::SemiMerge),
            vec![Pattern::Any, Pattern::Any],
        )
    }

    /// Match a multi-way index join over any number of frames.
    pub fn join_recursive() -> Self {
        Pattern::Op(OpMatcher::Kind(OpKind::JoinRecursive))
    }

    /// Match a filter whose frame input is a join.
    pub fn filter_join() -> Self {
        Pattern::Operator(OpMatcher::Kind(OpKind::Filter), vec![Pattern::join(), Pattern::Any])
    }

    /// Match a column projection or the index of a join.
    pub fn selection_join() -> Self {
        Pattern::Operator(OpMatcher::Selection, vec![Pattern::join()])
    }
}

/// Check if a plan node matches a pattern.
pub fn matches(node: &PlanNode, pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => node.inputs().is_empty(),
        Pattern::Op(matcher) => matcher.matches(node.op()),
        Pattern::Operator(matcher, child_patterns) => {
            if !matcher.matches(node.op()) {
                return false;
            }
            if node.inputs().len() != child_patterns.len() {
                return false;
            }
            node.inputs()
                .iter()
                .zip(child_patterns.iter())
                .all(|(child, p)| matches(child, p))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::divisions::Divisions;
    use crate::expr::{BinaryOp, DataType, JoinHints, JoinSpec, JoinType};
    use crate::schema::{Field, IndexField, Schema};
    use crate::session::Session;

    #[test]
    fn test_filter_join_pattern() {
        let session = Session::default();
        let schema = Schema::new(
            vec![Field::new("k", DataType::Int64), Field::new("v", DataType::Int64)],
            IndexField::unnamed(DataType::Int64),
        );
        let a = session.source("a", schema.clone(), Divisions::unknown(2));
        let b = session.source("b", schema, Divisions::unknown(2));
        let m = session
            .merge(&a, &b, JoinSpec::on(JoinType::Inner, &["k"]), JoinHints::default())
            .unwrap();
        let pred = session.compare(BinaryOp::Gt, &session.col(&m, "k"), 1i64);
        let filtered = session.filter(&m, &pred);

        assert!(matches(&filtered, &Pattern::filter_join()));
        assert!(!matches(&session.filter(&a, &pred), &Pattern::filter_join()));
        assert!(matches(&m, &Pattern::join()));
        assert!(matches(&a, &Pattern::Leaf));
        assert!(!matches(&m, &Pattern::semi_merge()));
        assert!(matches(&session.project(&m, &["k"]), &Pattern::selection_join()));
        assert!(matches(&session.index(&m), &Pattern::selection_join()));
        assert!(!matches(&session.project(&a, &["k"]), &Pattern::selection_join()));
    }
}
