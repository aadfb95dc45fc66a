//! # Filter Pushdown Rule
//!
//! Moves the conjuncts of a filter over a join into the join's inputs, so rows
//! are dropped before they are redistributed and merged.
//!
//! ```text
//! Before: Filter(Merge(L, R), p_left & p_right & p_both)
//! After:  Filter(Merge(Filter(L, p_left'), Filter(R, p_right')), p_both')
//! ```
//!
//! `p'` is `p` with the join substituted by the input it is pushed into (or, for
//! conjuncts that stay, by the rewritten join).
//!
//! ## When a Conjunct Moves
//!
//! A conjunct is pushed into a side when
//!
//! - it has a recognised shape: a column, a unary or membership test, or a
//!   comparison/arithmetic op whose right operand is a literal, a column or
//!   another elementwise expression. `And` nests are split first; opaque
//!   functions are never pushed;
//! - it reads the join only through column projections, and only columns that
//!   side provides under the same name (not a name produced by suffixing a
//!   collision with the other side);
//! - the join keeps that side's rows unfiltered: `left`, `inner` and `leftsemi`
//!   for the left input, `right` and `inner` for the right input.
//!
//! Anything else stays above the join. Declining is never an error.

use partx_core::error::PlanResult;
use partx_core::expr::{FrameOp, JoinType, OpKind, Operator, ScalarOp};
use partx_core::pattern::Pattern;
use partx_core::plan::{NodeId, PlanRef};
use partx_core::rule::{Rule, RuleContext, RuleType};
use partx_core::session::Session;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Push filter conjuncts below a join.
pub struct FilterPushdownRule;

impl Rule for FilterPushdownRule {
    fn name(&self) -> &str {
        "FilterPushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        // Match: Filter(Merge(L, R), predicate)
        Pattern::filter_join()
    }

    fn apply(&self, node: &PlanRef, ctx: &RuleContext) -> PlanResult<Option<PlanRef>> {
        let [join, predicate] = node.inputs() else {
            return Ok(None);
        };
        let Some(spec) = join.op().join_spec() else {
            return Ok(None);
        };
        let [left, right] = join.inputs() else {
            return Ok(None);
        };
        let session = ctx.session;
        let sides = SideColumns {
            left: session.columns(left)?.into_iter().collect(),
            right: session.columns(right)?.into_iter().collect(),
            joined: session.columns(join)?.into_iter().collect(),
        };

        let mut to_left = Vec::new();
        let mut to_right = Vec::new();
        let mut kept = Vec::new();
        for conjunct in split_conjuncts(predicate, join.id()) {
            let columns = if is_recognised(&conjunct) {
                predicate_columns(session, join, &conjunct)?
            } else {
                None
            };
            let (push_left, push_right) = match columns {
                Some(cols) if !cols.is_empty() => (
                    matches!(spec.how, JoinType::Left | JoinType::Inner | JoinType::LeftSemi)
                        && sides.provides(&cols, &sides.left, &sides.right, &spec.suffixes.0),
                    matches!(spec.how, JoinType::Right | JoinType::Inner)
                        && sides.provides(&cols, &sides.right, &sides.left, &spec.suffixes.1),
                ),
                _ => (false, false),
            };
            if push_left {
                to_left.push(session.substitute(&conjunct, join, left));
            }
            if push_right {
                to_right.push(session.substitute(&conjunct, join, right));
            }
            if !push_left && !push_right {
                kept.push(conjunct);
            }
        }
        if to_left.is_empty() && to_right.is_empty() {
            return Ok(None);
        }
        trace!(
            "{}: {} conjuncts into the left, {} into the right, {} kept",
            join.name(),
            to_left.len(),
            to_right.len(),
            kept.len()
        );

        let new_left = match conjoin(session, &to_left) {
            Some(p) => session.filter(left, &p),
            None => Arc::clone(left),
        };
        let new_right = match conjoin(session, &to_right) {
            Some(p) => session.filter(right, &p),
            None => Arc::clone(right),
        };
        let new_join = session.with_inputs(join, vec![new_left, new_right]);
        let kept: Vec<PlanRef> = kept
            .iter()
            .map(|c| session.substitute(c, join, &new_join))
            .collect();
        Ok(Some(match conjoin(session, &kept) {
            Some(p) => session.filter(&new_join, &p),
            None => new_join,
        }))
    }
}

struct SideColumns {
    left: HashSet<String>,
    right: HashSet<String>,
    joined: HashSet<String>,
}

impl SideColumns {
    /// Whether every column is a `side` column that reaches the output under its
    /// own name. A name that `other` also has and that was suffixed in the output
    /// refers to `other`'s column.
    fn provides(
        &self,
        columns: &BTreeSet<String>,
        side: &HashSet<String>,
        other: &HashSet<String>,
        suffix: &str,
    ) -> bool {
        let renamed = !suffix.is_empty()
            && columns
                .iter()
                .any(|c| self.joined.contains(&format!("{}{}", c, suffix)) && other.contains(c));
        columns.iter().all(|c| side.contains(c)) && !renamed
    }
}

/// The `And` conjuncts of `predicate`, left to right. Splitting stops at the
/// join node itself, which is kept as an opaque conjunct.
fn split_conjuncts(predicate: &PlanRef, join: NodeId) -> Vec<PlanRef> {
    let mut conjuncts = Vec::new();
    let mut stack = vec![Arc::clone(predicate)];
    while let Some(p) = stack.pop() {
        match p.inputs() {
            [a, b] if p.id() != join && p.kind() == OpKind::And => {
                stack.push(Arc::clone(b));
                stack.push(Arc::clone(a));
            }
            _ => conjuncts.push(p),
        }
    }
    conjuncts
}

fn is_recognised(conjunct: &PlanRef) -> bool {
    match conjunct.op() {
        Operator::Frame(FrameOp::Projection { .. })
        | Operator::Scalar(ScalarOp::Unaryop(_))
        | Operator::Scalar(ScalarOp::IsIn(_)) => true,
        Operator::Scalar(ScalarOp::Binop(_)) if conjunct.kind() != OpKind::And => {
            match conjunct.input(1).map(|r| r.op()) {
                Some(Operator::Scalar(ScalarOp::Literal(_)))
                | Some(Operator::Frame(FrameOp::Projection { .. })) => true,
                Some(op) => op.is_elementwise(),
                None => false,
            }
        }
        _ => false,
    }
}

/// Columns of the join that `conjunct` reads. `None` when it reads the join
/// other than through a column projection, or reads another frame.
fn predicate_columns(
    session: &Session,
    join: &PlanRef,
    conjunct: &PlanRef,
) -> PlanResult<Option<BTreeSet<String>>> {
    let mut columns = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut stack = vec![Arc::clone(conjunct)];
    while let Some(e) = stack.pop() {
        if e.id() == join.id() || !seen.insert(e.id()) {
            continue;
        }
        if e.inputs().is_empty() && !matches!(e.op(), Operator::Scalar(ScalarOp::Literal(_))) {
            return Ok(None);
        }
        if e.depends_on(join.id()) {
            if !matches!(e.op(), Operator::Frame(FrameOp::Projection { .. })) {
                return Ok(None);
            }
            columns.extend(session.columns(&e)?);
        }
        stack.extend(e.inputs().iter().cloned());
    }
    Ok(Some(columns))
}

fn conjoin(session: &Session, predicates: &[PlanRef]) -> Option<PlanRef> {
    let (first, rest) = predicates.split_first()?;
    Some(
        rest.iter()
            .fold(Arc::clone(first), |acc, p| session.and(&acc, p)),
    )
}
