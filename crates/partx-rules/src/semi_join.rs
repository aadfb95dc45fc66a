//! # Semi-Join Rewrite
//!
//! A `leftsemi` join only needs to know whether a right row with the same key
//! exists, so duplicate right keys carry no information. The rule deduplicates
//! the right input on its join key before handing the join to the general
//! two-table lowering:
//!
//! ```text
//! Before: SemiMerge(L, R)
//! After:  Merge[leftsemi](L, DropDuplicates(R, right key))
//! ```

use partx_core::error::PlanResult;
use partx_core::expr::{JoinSide, JoinType, LogicalJoin, Operator};
use partx_core::join::shuffle_key;
use partx_core::pattern::Pattern;
use partx_core::plan::PlanRef;
use partx_core::rule::{Rule, RuleContext, RuleType};

pub struct SemiJoinRule;

impl Rule for SemiJoinRule {
    fn name(&self) -> &str {
        "SemiJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Lowering
    }

    fn pattern(&self) -> Pattern {
        // Match: SemiMerge(L, R)
        Pattern::semi_merge()
    }

    fn apply(&self, node: &PlanRef, ctx: &RuleContext) -> PlanResult<Option<PlanRef>> {
        let Operator::Logical(LogicalJoin::SemiMerge { spec, hints }) = node.op() else {
            return Ok(None);
        };
        let [left, right] = node.inputs() else {
            return Ok(None);
        };
        let session = ctx.session;
        let on = shuffle_key(&session.meta(right)?, spec, JoinSide::Right);
        let deduplicated = session.drop_duplicates(right, on);
        let merged = session.merge(
            left,
            &deduplicated,
            spec.clone().with_how(JoinType::LeftSemi),
            hints.clone(),
        )?;
        Ok(Some(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partx_core::divisions::Divisions;
    use partx_core::expr::{DataType, FrameOp, JoinHints, JoinSpec, ShuffleKey};
    use partx_core::schema::{Field, IndexField, Schema};
    use partx_core::session::Session;

    #[test]
    fn test_semi_join_deduplicates_right_keys() {
        let session = Session::default();
        let schema = |v: &str| {
            Schema::new(
                vec![Field::new("k", DataType::Int64), Field::new(v, DataType::Int64)],
                IndexField::unnamed(DataType::Int64),
            )
        };
        let a = session.source("a", schema("x"), Divisions::unknown(4));
        let b = session.source("b", schema("y"), Divisions::unknown(4));
        let semi = session
            .semi_merge(&a, &b, JoinSpec::on(JoinType::Inner, &["k"]), JoinHints::default())
            .unwrap();
        assert_eq!(session.columns(&semi).unwrap(), vec!["k", "x"]);

        let rewritten = SemiJoinRule
            .apply(&semi, &RuleContext::new(&session))
            .unwrap()
            .unwrap();
        let spec = rewritten.op().join_spec().unwrap();
        assert_eq!(spec.how, JoinType::LeftSemi);
        let Operator::Frame(FrameOp::DropDuplicates { on }) = rewritten.inputs()[1].op() else {
            panic!("right input should be deduplicated");
        };
        assert_eq!(*on, ShuffleKey::Columns(vec!["k".to_string()]));
        assert_eq!(session.columns(&rewritten).unwrap(), session.columns(&semi).unwrap());
    }
}
