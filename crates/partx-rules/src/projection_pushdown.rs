//! # Projection Pushdown Rule
//!
//! Prunes the columns each join input carries when only part of the join's output
//! is consumed. Given a column projection (or the index) of a join, each input is
//! narrowed to
//!
//! - its join key columns,
//! - the columns that feed a requested output column,
//! - for a requested output that was suffixed to resolve a name collision, the
//!   colliding column of the other input, so the narrowed join still renames it.
//!
//! ```text
//! Before: Projection(Merge(L, R), cols)
//! After:  Projection(Merge(Projection(L, l), Projection(R, r)), cols)
//! ```
//!
//! The outer projection is dropped when the narrowed join already produces
//! exactly `cols`. The rule declines unless at least one input is strictly
//! narrowed, which keeps the rewrite driver at a fixpoint.
//!
//! A join is shared by every node that reads it. Inside a driver pass the
//! inputs are narrowed to the union of what all readers select, so sibling
//! projections rebuild one and the same narrowed join. A join read by anything
//! other than a projection or an index selection (a filter, another join) is
//! left alone.

use partx_core::error::PlanResult;
use partx_core::expr::{FrameOp, Operator};
use partx_core::pattern::Pattern;
use partx_core::plan::PlanRef;
use partx_core::rule::{Rule, RuleContext, RuleType};
use partx_core::schema::{ColumnSource, KeyRef};
use std::collections::HashSet;
use tracing::trace;

/// Push column requirements below a join.
pub struct ProjectionPushdownRule;

impl Rule for ProjectionPushdownRule {
    fn name(&self) -> &str {
        "ProjectionPushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Rewrite
    }

    fn pattern(&self) -> Pattern {
        // Match: Projection(Merge(L, R)) or Index(Merge(L, R))
        Pattern::selection_join()
    }

    fn apply(&self, node: &PlanRef, ctx: &RuleContext) -> PlanResult<Option<PlanRef>> {
        let Some(requested) = selected_columns(node) else {
            return Ok(None);
        };
        let [join] = node.inputs() else {
            return Ok(None);
        };
        let [left, right] = join.inputs() else {
            return Ok(None);
        };
        // the narrowed join has to serve every reader of the join
        let wanted: HashSet<String> = match ctx.consumers {
            None => requested.iter().cloned().collect(),
            Some(consumers) => {
                let readers = consumers.of(join.id());
                if readers.is_empty() {
                    return Ok(None);
                }
                let mut wanted = HashSet::new();
                for reader in readers {
                    match selected_columns(reader) {
                        Some(columns) => wanted.extend(columns),
                        None => {
                            trace!("{}: read by {}, not narrowing", join.name(), reader.name());
                            return Ok(None);
                        }
                    }
                }
                wanted
            }
        };
        let session = ctx.session;
        let layout = session.merge_layout(join)?;

        let mut needed_left: HashSet<String> = key_columns(&layout.left_keys);
        let mut needed_right: HashSet<String> = key_columns(&layout.right_keys);
        for (field, source) in &layout.columns {
            if !wanted.contains(&field.name) {
                continue;
            }
            match source {
                ColumnSource::Left(name) => {
                    needed_left.insert(name.clone());
                    if field.name != *name {
                        needed_right.insert(name.clone());
                    }
                }
                ColumnSource::Right(name) => {
                    needed_right.insert(name.clone());
                    if field.name != *name {
                        needed_left.insert(name.clone());
                    }
                }
                ColumnSource::Coalesced { left, right } => {
                    needed_left.insert(left.clone());
                    needed_right.insert(right.clone());
                }
                ColumnSource::Indicator => {}
            }
        }

        let left_columns = session.columns(left)?;
        let right_columns = session.columns(right)?;
        // keep each input's column order
        let project_left: Vec<String> = left_columns
            .iter()
            .filter(|c| needed_left.contains(*c))
            .cloned()
            .collect();
        let project_right: Vec<String> = right_columns
            .iter()
            .filter(|c| needed_right.contains(*c))
            .cloned()
            .collect();
        if project_left.len() == left_columns.len()
            && project_right.len() == right_columns.len()
        {
            return Ok(None);
        }
        trace!(
            "{}: narrowing inputs to {:?} and {:?}",
            join.name(),
            project_left,
            project_right
        );

        let new_left = if project_left.len() == left_columns.len() {
            left.clone()
        } else {
            session.project_owned(left, project_left)
        };
        let new_right = if project_right.len() == right_columns.len() {
            right.clone()
        } else {
            session.project_owned(right, project_right)
        };
        let new_join = session.with_inputs(join, vec![new_left, new_right]);

        if matches!(node.op(), Operator::Frame(FrameOp::Index)) {
            return Ok(Some(session.index(&new_join)));
        }
        if session.columns(&new_join)? == requested {
            Ok(Some(new_join))
        } else {
            Ok(Some(session.project_owned(&new_join, requested)))
        }
    }
}

/// Columns a projection reads; none for an index selection. `None` for any
/// other operator.
fn selected_columns(node: &PlanRef) -> Option<Vec<String>> {
    match node.op() {
        Operator::Frame(FrameOp::Projection { columns }) => Some(columns.clone()),
        Operator::Frame(FrameOp::Index) => Some(Vec::new()),
        _ => None,
    }
}

fn key_columns(keys: &[KeyRef]) -> HashSet<String> {
    keys.iter()
        .filter_map(|k| match k {
            KeyRef::Column(name) => Some(name.clone()),
            KeyRef::Index => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use partx_core::divisions::Divisions;
    use partx_core::expr::{BinaryOp, DataType, JoinHints, JoinSpec, JoinType, OpKind};
    use partx_core::plan::Consumers;
    use partx_core::schema::{Field, IndexField, Schema};
    use partx_core::session::Session;

    fn frame(session: &Session, name: &str, cols: &[&str]) -> PlanRef {
        let schema = Schema::new(
            cols.iter().map(|c| Field::new(*c, DataType::Int64)).collect(),
            IndexField::unnamed(DataType::Int64),
        );
        session.source(name, schema, Divisions::unknown(4))
    }

    fn apply(session: &Session, node: &PlanRef) -> Option<PlanRef> {
        ProjectionPushdownRule
            .apply(node, &RuleContext::new(session))
            .unwrap()
    }

    fn merged(session: &Session) -> PlanRef {
        let l = frame(session, "l", &["k", "a", "b", "v"]);
        let r = frame(session, "r", &["k", "c", "d", "v"]);
        session
            .merge(&l, &r, JoinSpec::on(JoinType::Inner, &["k"]), JoinHints::default())
            .unwrap()
    }

    // ----------------------------------------------------------------------

    #[test]
    fn test_prunes_both_inputs_to_keys_and_requested_columns() {
        let session = Session::default();
        let m = merged(&session);
        let out = apply(&session, &session.project(&m, &["a", "c"])).unwrap();

        // the narrowed join still carries the key, so the projection stays
        assert_eq!(out.kind(), OpKind::Projection);
        assert_eq!(session.columns(&out).unwrap(), vec!["a", "c"]);
        let join = &out.inputs()[0];
        assert_eq!(session.columns(&join.inputs()[0]).unwrap(), vec!["k", "a"]);
        assert_eq!(session.columns(&join.inputs()[1]).unwrap(), vec!["k", "c"]);
        // already narrow: nothing more to do
        assert!(apply(&session, &out).is_none());
    }

    #[test]
    fn test_suffixed_column_keeps_its_counterpart() {
        let session = Session::default();
        let m = merged(&session);
        let out = apply(&session, &session.project(&m, &["k", "v_y"])).unwrap();
        let join = &out.inputs()[0];
        assert_eq!(session.columns(&join.inputs()[0]).unwrap(), vec!["k", "v"]);
        assert_eq!(session.columns(&join.inputs()[1]).unwrap(), vec!["k", "v"]);
        assert_eq!(session.columns(&out).unwrap(), vec!["k", "v_y"]);
    }

    #[test]
    fn test_projection_dropped_when_join_matches_request() {
        let session = Session::default();
        let m = merged(&session);
        let out = apply(&session, &session.project(&m, &["k", "a", "d"])).unwrap();
        assert_eq!(out.kind(), OpKind::Merge);
        assert_eq!(session.columns(&out).unwrap(), vec!["k", "a", "d"]);
    }

    #[test]
    fn test_index_request_keeps_only_keys() {
        let session = Session::default();
        let m = merged(&session);
        let out = apply(&session, &session.index(&m)).unwrap();
        assert_eq!(out.kind(), OpKind::Index);
        let join = &out.inputs()[0];
        assert_eq!(session.columns(&join.inputs()[0]).unwrap(), vec!["k"]);
        assert_eq!(session.columns(&join.inputs()[1]).unwrap(), vec!["k"]);
    }

    #[test]
    fn test_declines_when_every_column_is_needed() {
        let session = Session::default();
        let l = frame(&session, "l", &["k", "a"]);
        let r = frame(&session, "r", &["k", "c"]);
        let m = session
            .merge(&l, &r, JoinSpec::on(JoinType::Left, &["k"]), JoinHints::default())
            .unwrap();
        assert!(apply(&session, &session.project(&m, &["a", "c"])).is_none());
    }

    #[test]
    fn test_sibling_projections_share_one_narrowed_join() {
        let session = Session::default();
        let m = merged(&session);
        let a = session.project(&m, &["a"]);
        let c = session.project(&m, &["c"]);
        let root = session.binop(BinaryOp::Add, &a, &c);
        let consumers = Consumers::of_plan(&root);
        let ctx = RuleContext::with_consumers(&session, &consumers);

        let out_a = ProjectionPushdownRule.apply(&a, &ctx).unwrap().unwrap();
        let out_c = ProjectionPushdownRule.apply(&c, &ctx).unwrap().unwrap();
        assert_eq!(out_a.inputs()[0].id(), out_c.inputs()[0].id());
        let join = &out_a.inputs()[0];
        assert_eq!(session.columns(&join.inputs()[0]).unwrap(), vec!["k", "a"]);
        assert_eq!(session.columns(&join.inputs()[1]).unwrap(), vec!["k", "c"]);
    }

    #[test]
    fn test_declines_when_join_has_other_readers() {
        let session = Session::default();
        let m = merged(&session);
        let projected = session.project(&m, &["a"]);
        let pred = session.compare(BinaryOp::Gt, &projected, 5i64);
        let root = session.filter(&m, &pred);
        let consumers = Consumers::of_plan(&root);
        let ctx = RuleContext::with_consumers(&session, &consumers);
        assert!(ProjectionPushdownRule.apply(&projected, &ctx).unwrap().is_none());

        // a join the pass has not seen yet is left for the next pass
        let other = session
            .merge(
                &frame(&session, "l", &["k", "a", "b"]),
                &frame(&session, "r", &["k", "c"]),
                JoinSpec::on(JoinType::Inner, &["k"]),
                JoinHints::default(),
            )
            .unwrap();
        let unseen = session.project(&other, &["c"]);
        assert!(ProjectionPushdownRule.apply(&unseen, &ctx).unwrap().is_none());
    }
}
