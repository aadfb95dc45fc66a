//! # Multi-way Join Reduction
//!
//! Lowers `JoinRecursive` into a tree of two-table index joins, which the
//! lowering driver then lowers one by one. An outer reduction is balanced, so
//! `k` frames give a tree of depth `O(log k)`; a left reduction joins the first
//! frame against the outer reduction of the rest.

use partx_core::error::PlanResult;
use partx_core::expr::{LogicalJoin, Operator};
use partx_core::join::reduce_join_recursive;
use partx_core::pattern::Pattern;
use partx_core::plan::PlanRef;
use partx_core::rule::{Rule, RuleContext, RuleType};

pub struct JoinRecursiveRule;

impl Rule for JoinRecursiveRule {
    fn name(&self) -> &str {
        "JoinRecursive"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Lowering
    }

    fn pattern(&self) -> Pattern {
        Pattern::join_recursive()
    }

    fn apply(&self, node: &PlanRef, ctx: &RuleContext) -> PlanResult<Option<PlanRef>> {
        let Operator::Logical(LogicalJoin::JoinRecursive { how }) = node.op() else {
            return Ok(None);
        };
        reduce_join_recursive(ctx.session, node.inputs(), *how).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partx_core::divisions::Divisions;
    use partx_core::expr::{DataType, JoinType, ScalarValue};
    use partx_core::schema::{Field, IndexField, Schema};
    use partx_core::session::Session;

    #[test]
    fn test_reduces_to_two_table_joins() {
        let session = Session::default();
        let frames: Vec<PlanRef> = (0..4)
            .map(|i| {
                let schema = Schema::new(
                    vec![Field::new(format!("v{}", i), DataType::Int64)],
                    IndexField::named("id", DataType::Int64),
                );
                let bounds = vec![ScalarValue::from(0i64), ScalarValue::from(100i64)];
                let divisions = Divisions::new(bounds).unwrap();
                session.source(&format!("t{}", i), schema, divisions)
            })
            .collect();
        let node = session.join_recursive(&frames, JoinType::Outer).unwrap();
        let reduced = JoinRecursiveRule
            .apply(&node, &RuleContext::new(&session))
            .unwrap()
            .unwrap();
        assert_eq!(reduced.inputs().len(), 2);
        assert_eq!(reduced.inputs()[0].inputs()[1].id(), frames[1].id());
        assert_eq!(reduced.inputs()[1].inputs()[0].id(), frames[2].id());
        assert_eq!(
            session.columns(&reduced).unwrap(),
            vec!["v0", "v1", "v2", "v3"]
        );
        assert_eq!(session.meta(&node).unwrap(), session.meta(&reduced).unwrap());
    }
}
