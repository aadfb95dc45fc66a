//! # Join Lowering Rule
//!
//! Replaces an abstract `Merge` by exactly one physical strategy, chosen from the
//! join's derived properties in a fixed order:
//!
//! ```text
//! single-partition broadcast -> AlignedMerge(L, R)
//! indexed merge              -> AlignedMerge(Repartition(L, d), Repartition(R, d))
//!                               d = merged boundaries of L and R
//! broadcast                  -> BroadcastJoin(L', R')
//!                               streaming side repartitioned to the hint,
//!                               broadcast side hashed into its own partition
//!                               count unless the join is inner
//! service transport          -> ServiceShuffleJoin(L, R)
//! otherwise                  -> AlignedMerge(Shuffle(L, n), Shuffle(R, n))
//! ```
//!
//! The choice is a pure function of the inputs' partition counts, divisions,
//! schemas and the hints, so lowering two identical joins yields identical
//! physical nodes.

use partx_core::divisions::Divisions;
use partx_core::error::{PlanError, PlanResult};
use partx_core::expr::{JoinSide, JoinType, LogicalJoin, Operator};
use partx_core::join::{shuffle_key, JoinStrategy};
use partx_core::pattern::Pattern;
use partx_core::plan::PlanRef;
use partx_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;
use tracing::debug;

/// Lower an abstract two-table join to a physical strategy.
pub struct LowerMergeRule;

impl Rule for LowerMergeRule {
    fn name(&self) -> &str {
        "LowerMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Lowering
    }

    fn pattern(&self) -> Pattern {
        // Match: Merge(L, R)
        Pattern::merge()
    }

    fn apply(&self, node: &PlanRef, ctx: &RuleContext) -> PlanResult<Option<PlanRef>> {
        let Operator::Logical(LogicalJoin::Merge { spec, hints }) = node.op() else {
            return Ok(None);
        };
        let session = ctx.session;
        let (left, right) = match node.inputs() {
            [l, r] => (l, r),
            _ => return Err(PlanError::InvalidPlan(format!("{} expects 2 inputs", node.op()))),
        };
        let props = session.join_properties(node)?;
        let strategy = props.strategy();
        debug!(
            "{}: {} ({} x {} partitions, effective {})",
            node.name(),
            strategy,
            props.left_npartitions,
            props.right_npartitions,
            props.effective_npartitions
        );

        let lowered = match strategy {
            JoinStrategy::SinglePartitionBroadcast => {
                session.aligned_merge(left, right, spec.clone())
            }
            JoinStrategy::IndexedMerge => {
                let divisions =
                    Divisions::merge(&session.divisions(left)?, &session.divisions(right)?);
                let left = session.repartition_divisions(left, divisions.clone(), true);
                let right = session.repartition_divisions(right, divisions, true);
                session.aligned_merge(&left, &right, spec.clone())
            }
            JoinStrategy::Broadcast => {
                let side = props.broadcast_side;
                let (broadcast, streaming) = match side {
                    JoinSide::Left => (left, right),
                    JoinSide::Right => (right, left),
                };
                let streaming_on = shuffle_key(&session.meta(streaming)?, spec, side.other());
                let streaming = match hints.npartitions {
                    Some(n) => session.repartition_npartitions(streaming, n),
                    None => Arc::clone(streaming),
                };
                let broadcast = if spec.how == JoinType::Inner {
                    Arc::clone(broadcast)
                } else {
                    // replica j must hold exactly hash bucket j
                    let on = shuffle_key(&session.meta(broadcast)?, spec, side);
                    session.shuffle(broadcast, on, session.npartitions(broadcast)?)
                };
                let (l, r) = match side {
                    JoinSide::Left => (broadcast, streaming),
                    JoinSide::Right => (streaming, broadcast),
                };
                session.broadcast_join(&l, &r, spec.clone(), side, streaming_on)
            }
            JoinStrategy::ServiceShuffle => session.service_shuffle_join(
                left,
                right,
                spec.clone(),
                shuffle_key(&session.meta(left)?, spec, JoinSide::Left),
                shuffle_key(&session.meta(right)?, spec, JoinSide::Right),
                hints.npartitions,
            ),
            JoinStrategy::TaskShuffle => {
                let n = props.effective_npartitions;
                let left_on = shuffle_key(&session.meta(left)?, spec, JoinSide::Left);
                let right_on = shuffle_key(&session.meta(right)?, spec, JoinSide::Right);
                let left = session.shuffle(left, left_on, n);
                let right = session.shuffle(right, right_on, n);
                session.aligned_merge(&left, &right, spec.clone())
            }
        };
        Ok(Some(lowered))
    }
}
