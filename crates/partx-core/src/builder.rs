//! Node constructors on [`Session`].
//!
//! Every constructor interns its node, so building the same expression twice
//! yields the same shared node.

use crate::divisions::Divisions;
use crate::error::{PlanError, PlanResult};
use crate::expr::{
    BinaryOp, FrameOp, JoinHints, JoinSide, JoinSpec, JoinType, LogicalJoin, Operator,
    PhysicalJoin, RepartitionSpec, ScalarOp, ScalarValue, ShuffleKey, UnaryOp,
};
use crate::plan::PlanRef;
use crate::schema::Schema;
use crate::session::Session;
use std::sync::Arc;

impl Session {
    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// A partitioned table.
    pub fn source(&self, name: &str, schema: Schema, divisions: Divisions) -> PlanRef {
        self.frame(
            FrameOp::Source {
                name: name.to_string(),
                schema,
                divisions,
            },
            vec![],
        )
    }

    pub fn project(&self, frame: &PlanRef, columns: &[&str]) -> PlanRef {
        self.project_owned(frame, columns.iter().map(|c| c.to_string()).collect())
    }

    pub fn project_owned(&self, frame: &PlanRef, columns: Vec<String>) -> PlanRef {
        self.frame(FrameOp::Projection { columns }, vec![Arc::clone(frame)])
    }

    /// A single column, usable as an elementwise operand.
    pub fn col(&self, frame: &PlanRef, column: &str) -> PlanRef {
        self.project(frame, &[column])
    }

    pub fn index(&self, frame: &PlanRef) -> PlanRef {
        self.frame(FrameOp::Index, vec![Arc::clone(frame)])
    }

    pub fn filter(&self, frame: &PlanRef, predicate: &PlanRef) -> PlanRef {
        self.frame(FrameOp::Filter, vec![Arc::clone(frame), Arc::clone(predicate)])
    }

    pub fn repartition_npartitions(&self, frame: &PlanRef, npartitions: usize) -> PlanRef {
        self.frame(
            FrameOp::Repartition(RepartitionSpec::Partitions(npartitions)),
            vec![Arc::clone(frame)],
        )
    }

    pub fn repartition_divisions(
        &self,
        frame: &PlanRef,
        divisions: Divisions,
        force: bool,
    ) -> PlanRef {
        self.frame(
            FrameOp::Repartition(RepartitionSpec::Divisions { divisions, force }),
            vec![Arc::clone(frame)],
        )
    }

    /// Hash-redistribute `frame` by `on` into `npartitions_out` buckets.
    pub fn shuffle(&self, frame: &PlanRef, on: ShuffleKey, npartitions_out: usize) -> PlanRef {
        self.frame(
            FrameOp::Shuffle {
                on,
                npartitions_out,
            },
            vec![Arc::clone(frame)],
        )
    }

    pub fn drop_duplicates(&self, frame: &PlanRef, on: ShuffleKey) -> PlanRef {
        self.frame(FrameOp::DropDuplicates { on }, vec![Arc::clone(frame)])
    }

    fn frame(&self, op: FrameOp, inputs: Vec<PlanRef>) -> PlanRef {
        self.node(Operator::Frame(op), inputs)
    }

    // ------------------------------------------------------------------
    // Elementwise
    // ------------------------------------------------------------------

    pub fn literal(&self, value: impl Into<ScalarValue>) -> PlanRef {
        self.node(Operator::Scalar(ScalarOp::Literal(value.into())), vec![])
    }

    pub fn binop(&self, op: BinaryOp, left: &PlanRef, right: &PlanRef) -> PlanRef {
        self.node(
            Operator::Scalar(ScalarOp::Binop(op)),
            vec![Arc::clone(left), Arc::clone(right)],
        )
    }

    /// `left <op> literal`.
    pub fn compare(&self, op: BinaryOp, left: &PlanRef, value: impl Into<ScalarValue>) -> PlanRef {
        let literal = self.literal(value);
        self.binop(op, left, &literal)
    }

    pub fn and(&self, left: &PlanRef, right: &PlanRef) -> PlanRef {
        self.binop(BinaryOp::And, left, right)
    }

    pub fn unaryop(&self, op: UnaryOp, operand: &PlanRef) -> PlanRef {
        self.node(Operator::Scalar(ScalarOp::Unaryop(op)), vec![Arc::clone(operand)])
    }

    pub fn isin(&self, operand: &PlanRef, values: Vec<ScalarValue>) -> PlanRef {
        self.node(Operator::Scalar(ScalarOp::IsIn(values)), vec![Arc::clone(operand)])
    }

    /// Opaque elementwise map.
    pub fn function(&self, name: &str, operand: &PlanRef) -> PlanRef {
        self.node(
            Operator::Scalar(ScalarOp::Function(name.to_string())),
            vec![Arc::clone(operand)],
        )
    }

    // ------------------------------------------------------------------
    // Joins
    // ------------------------------------------------------------------

    /// Abstract two-table join. The output schema is derived immediately so that
    /// schema mismatches fail here.
    ///
    /// A spec without keys or index flags joins on the columns both sides share.
    pub fn merge(
        &self,
        left: &PlanRef,
        right: &PlanRef,
        spec: JoinSpec,
        hints: JoinHints,
    ) -> PlanResult<PlanRef> {
        let spec = self.resolve_default_keys(left, right, spec)?;
        let node = self.node(
            Operator::Logical(LogicalJoin::Merge { spec, hints }),
            vec![Arc::clone(left), Arc::clone(right)],
        );
        self.meta(&node)?;
        Ok(node)
    }

    /// Abstract `leftsemi` join that deduplicates its right input before joining.
    pub fn semi_merge(
        &self,
        left: &PlanRef,
        right: &PlanRef,
        spec: JoinSpec,
        hints: JoinHints,
    ) -> PlanResult<PlanRef> {
        let spec = self
            .resolve_default_keys(left, right, spec)?
            .with_how(JoinType::LeftSemi);
        let node = self.node(
            Operator::Logical(LogicalJoin::SemiMerge { spec, hints }),
            vec![Arc::clone(left), Arc::clone(right)],
        );
        self.meta(&node)?;
        Ok(node)
    }

    /// Index join of an ordered list of frames.
    pub fn join_recursive(&self, frames: &[PlanRef], how: JoinType) -> PlanResult<PlanRef> {
        if frames.is_empty() {
            return Err(PlanError::InvalidPlan(
                "join_recursive needs at least one frame".to_string(),
            ));
        }
        let node = self.node(
            Operator::Logical(LogicalJoin::JoinRecursive { how }),
            frames.to_vec(),
        );
        self.meta(&node)?;
        Ok(node)
    }

    pub fn aligned_merge(&self, left: &PlanRef, right: &PlanRef, spec: JoinSpec) -> PlanRef {
        self.node(
            Operator::Physical(PhysicalJoin::AlignedMerge { spec }),
            vec![Arc::clone(left), Arc::clone(right)],
        )
    }

    pub fn broadcast_join(
        &self,
        left: &PlanRef,
        right: &PlanRef,
        spec: JoinSpec,
        side: JoinSide,
        split_on: ShuffleKey,
    ) -> PlanRef {
        self.node(
            Operator::Physical(PhysicalJoin::Broadcast {
                spec,
                side,
                split_on,
            }),
            vec![Arc::clone(left), Arc::clone(right)],
        )
    }

    pub fn service_shuffle_join(
        &self,
        left: &PlanRef,
        right: &PlanRef,
        spec: JoinSpec,
        left_on: ShuffleKey,
        right_on: ShuffleKey,
        npartitions: Option<usize>,
    ) -> PlanRef {
        self.node(
            Operator::Physical(PhysicalJoin::ServiceShuffle {
                spec,
                left_on,
                right_on,
                npartitions,
            }),
            vec![Arc::clone(left), Arc::clone(right)],
        )
    }

    fn resolve_default_keys(
        &self,
        left: &PlanRef,
        right: &PlanRef,
        mut spec: JoinSpec,
    ) -> PlanResult<JoinSpec> {
        let keyless = !spec.left_index
            && !spec.right_index
            && spec.left_on.is_empty()
            && spec.right_on.is_empty();
        if keyless {
            let right_columns = self.columns(right)?;
            let shared: Vec<String> = self
                .columns(left)?
                .into_iter()
                .filter(|c| right_columns.contains(c))
                .collect();
            if shared.is_empty() {
                return Err(PlanError::InvalidPlan(
                    "no join keys given and no common columns".to_string(),
                ));
            }
            spec.left_on = shared.clone();
            spec.right_on = shared;
        }
        Ok(spec)
    }
}
