//! # Abstract Join Properties
//!
//! [`JoinProperties`] is the read-only view the planner takes of an abstract
//! `Merge` (or `SemiMerge`) node. Everything in it is a pure function of the two
//! inputs' partition counts, divisions, sample schemas, the join spec and the
//! hints, and is memoized per node identity by the session.
//!
//! ## Strategy Precedence
//!
//! The physical strategy is chosen in a fixed order; a lower-priority strategy is
//! only considered when every earlier one does not apply:
//!
//! 1. **Single-partition broadcast** - one side has a single partition and the
//!    join keeps every row of the other side (or both sides are single).
//! 2. **Indexed merge** - both sides join on their index and both have known
//!    divisions: repartition both to the merged boundaries, no hashing.
//! 3. **Broadcast** - the smaller side is replicated against every partition of
//!    the larger one when `min(n) < log2(max(n)) * bias` (or forced).
//! 4. **Service shuffle** - hash redistribution through the shuffle service.
//! 5. **Task shuffle** - hash redistribution expressed as graph tasks.
//!
//! Contradictory hints never fail; they only skip strategies.

use crate::divisions::Divisions;
use crate::error::{PlanError, PlanResult};
use crate::expr::{
    BroadcastHint, JoinHints, JoinSide, JoinSpec, JoinType, LogicalJoin, Operator, ShuffleKey,
    ShuffleMethod,
};
use crate::plan::PlanRef;
use crate::schema::Schema;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Physical strategy an abstract join lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    SinglePartitionBroadcast,
    IndexedMerge,
    Broadcast,
    ServiceShuffle,
    TaskShuffle,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinStrategy::SinglePartitionBroadcast => "single-partition broadcast",
            JoinStrategy::IndexedMerge => "indexed merge",
            JoinStrategy::Broadcast => "broadcast",
            JoinStrategy::ServiceShuffle => "service shuffle",
            JoinStrategy::TaskShuffle => "task shuffle",
        };
        write!(f, "{}", name)
    }
}

/// Derived properties of an abstract two-table join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinProperties {
    pub left_npartitions: usize,
    pub right_npartitions: usize,
    /// The partition-count hint if given, else `max(left, right)`.
    pub effective_npartitions: usize,
    /// `Left` iff the left side has strictly fewer partitions.
    pub broadcast_side: JoinSide,
    pub single_partition_broadcast: bool,
    pub merge_indexed_left: bool,
    pub merge_indexed_right: bool,
    /// The shuffle hint, else the configured default.
    pub shuffle_method: ShuffleMethod,
    pub broadcast: bool,
    pub divisions: Divisions,
}

impl JoinProperties {
    pub fn is_indexed_merge(&self) -> bool {
        self.merge_indexed_left && self.merge_indexed_right
    }

    pub fn npartitions(&self) -> usize {
        self.divisions.npartitions()
    }

    pub fn strategy(&self) -> JoinStrategy {
        if self.single_partition_broadcast {
            JoinStrategy::SinglePartitionBroadcast
        } else if self.is_indexed_merge() {
            JoinStrategy::IndexedMerge
        } else if self.broadcast {
            JoinStrategy::Broadcast
        } else if self.shuffle_method == ShuffleMethod::Service {
            JoinStrategy::ServiceShuffle
        } else {
            JoinStrategy::TaskShuffle
        }
    }

    /// Derive the properties of an abstract join node.
    pub fn derive(session: &Session, node: &PlanRef) -> PlanResult<JoinProperties> {
        let (spec, hints) = match node.op() {
            Operator::Logical(LogicalJoin::Merge { spec, hints })
            | Operator::Logical(LogicalJoin::SemiMerge { spec, hints }) => (spec, hints),
            other => {
                return Err(PlanError::InvalidPlan(format!(
                    "{} has no abstract join properties",
                    other
                )))
            }
        };
        let (left, right) = join_inputs(node)?;
        let left_n = session.npartitions(left)?;
        let right_n = session.npartitions(right)?;
        let left_meta = session.meta(left)?;
        let right_meta = session.meta(right)?;

        let effective_npartitions = hints.npartitions.unwrap_or(left_n.max(right_n));
        let broadcast_side = if left_n < right_n {
            JoinSide::Left
        } else {
            JoinSide::Right
        };
        let single_partition_broadcast = is_single_partition_broadcast(spec.how, left_n, right_n);
        let merge_indexed_left =
            joins_on_index(&left_meta, spec, JoinSide::Left) && session.known_divisions(left)?;
        let merge_indexed_right =
            joins_on_index(&right_meta, spec, JoinSide::Right) && session.known_divisions(right)?;
        let shuffle_method = hints
            .shuffle_method
            .unwrap_or(session.config().shuffle_method);

        let broadcast = !(merge_indexed_left && merge_indexed_right)
            && !single_partition_broadcast
            && broadcast_heuristic(
                spec.how,
                broadcast_side,
                shuffle_method,
                hints,
                session.config().broadcast_bias,
                left_n,
                right_n,
            );

        let mut props = JoinProperties {
            left_npartitions: left_n,
            right_npartitions: right_n,
            effective_npartitions,
            broadcast_side,
            single_partition_broadcast,
            merge_indexed_left,
            merge_indexed_right,
            shuffle_method,
            broadcast,
            divisions: Divisions::unknown(effective_npartitions),
        };
        props.divisions = abstract_divisions(session, node, spec, hints, &props)?;
        Ok(props)
    }
}

/// One-partition right side keeps every left row for `left|inner|leftsemi`; a
/// one-partition left side keeps every right row for `right|inner`.
pub fn is_single_partition_broadcast(how: JoinType, left_n: usize, right_n: usize) -> bool {
    left_n.max(right_n) == 1
        || (left_n == 1 && matches!(how, JoinType::Right | JoinType::Inner))
        || (right_n == 1 && matches!(how, JoinType::Left | JoinType::Inner | JoinType::LeftSemi))
}

fn broadcast_heuristic(
    how: JoinType,
    broadcast_side: JoinSide,
    method: ShuffleMethod,
    hints: &JoinHints,
    default_bias: f64,
    left_n: usize,
    right_n: usize,
) -> bool {
    let (bias, forced) = match hints.broadcast {
        Some(BroadcastHint::Bias(b)) => (b.0, None),
        Some(BroadcastHint::Force(f)) => (default_bias, Some(f)),
        None => (default_bias, None),
    };
    // rows of the preserved (or semi-filtered) side must be emitted once, so
    // that side is never the replicated one
    let preserves_broadcast_side = match broadcast_side {
        JoinSide::Left => matches!(how, JoinType::Left | JoinType::LeftSemi),
        JoinSide::Right => how == JoinType::Right,
    };
    if method != ShuffleMethod::Tasks
        || how == JoinType::Outer
        || preserves_broadcast_side
        || forced == Some(false)
    {
        return false;
    }
    let n_low = left_n.min(right_n) as f64;
    let n_high = left_n.max(right_n) as f64;
    forced == Some(true) || n_low < n_high.log2() * bias
}

/// Whether a side joins on its index, by flag or through a key naming the index.
pub fn joins_on_index(schema: &Schema, spec: &JoinSpec, side: JoinSide) -> bool {
    spec.index_flag(side) || schema.contains_index_name(spec.keys(side))
}

/// The key a side is hash-redistributed by: its key columns, or its index
/// (named, or the `_index` placeholder) when it joins on the index flag.
pub fn shuffle_key(schema: &Schema, spec: &JoinSpec, side: JoinSide) -> ShuffleKey {
    if spec.index_flag(side) {
        ShuffleKey::Index(schema.index.shuffle_name())
    } else {
        ShuffleKey::Columns(spec.keys(side).to_vec())
    }
}

fn join_inputs(node: &PlanRef) -> PlanResult<(&PlanRef, &PlanRef)> {
    match node.inputs() {
        [left, right] => Ok((left, right)),
        other => Err(PlanError::InvalidPlan(format!(
            "{} expects 2 inputs, got {}",
            node.op(),
            other.len()
        ))),
    }
}

fn index_names_match(a: &Schema, b: &Schema) -> bool {
    a.index.name == b.index.name
}

/// Output divisions of the abstract join, consistent with what its lowering
/// produces.
fn abstract_divisions(
    session: &Session,
    node: &PlanRef,
    spec: &JoinSpec,
    hints: &JoinHints,
    props: &JoinProperties,
) -> PlanResult<Divisions> {
    let (left, right) = join_inputs(node)?;
    let left_n = props.left_npartitions;
    let right_n = props.right_npartitions;

    if props.is_indexed_merge() && (!props.single_partition_broadcast || left_n == right_n) {
        let left_div = session.divisions(left)?;
        let right_div = session.divisions(right)?;
        let merged = Divisions::merge(&left_div, &right_div);
        if left_n == 1 && right_n == 1 {
            return match (merged.first(), merged.last()) {
                (Some(lo), Some(hi)) => Divisions::new(vec![lo.clone(), hi.clone()]),
                _ => Ok(merged),
            };
        }
        return Ok(merged);
    }

    if props.single_partition_broadcast {
        let left_meta = session.meta(left)?;
        let right_meta = session.meta(right)?;
        return single_partition_divisions(session, node, spec, &left_meta, &right_meta);
    }

    if props.broadcast {
        let result = session.meta(node)?;
        let streaming = match props.broadcast_side {
            JoinSide::Left => right,
            JoinSide::Right => left,
        };
        let streaming = match hints.npartitions {
            Some(n) => session.repartition_npartitions(streaming, n),
            None => Arc::clone(streaming),
        };
        let streaming_meta = session.meta(&streaming)?;
        if index_names_match(&streaming_meta, &result) {
            return session.divisions(&streaming);
        }
        return Ok(Divisions::unknown(session.npartitions(&streaming)?));
    }

    Ok(Divisions::unknown(props.effective_npartitions))
}

/// Divisions when one side is a single partition broadcast to the other.
fn single_partition_divisions(
    session: &Session,
    node: &PlanRef,
    spec: &JoinSpec,
    left_meta: &Schema,
    right_meta: &Schema,
) -> PlanResult<Divisions> {
    let (left, right) = join_inputs(node)?;
    let left_n = session.npartitions(left)?;
    let right_n = session.npartitions(right)?;
    let use_left = joins_on_index(right_meta, spec, JoinSide::Right);
    let use_right = joins_on_index(left_meta, spec, JoinSide::Left);
    if use_right && left_n == 1 && matches!(spec.how, JoinType::Right | JoinType::Inner) {
        return session.divisions(right);
    }
    if use_left
        && right_n == 1
        && matches!(spec.how, JoinType::Inner | JoinType::Left | JoinType::LeftSemi)
    {
        return session.divisions(left);
    }
    Ok(Divisions::unknown(left_n.max(right_n)))
}

/// Divisions of a partition-aligned merge node.
///
/// Equal partition counts: the merged boundaries when both sides are indexed with
/// known divisions, otherwise unknown. Unequal counts (one side is a single
/// partition): the larger side's divisions when they are known and carry over to
/// the result, otherwise unknown.
pub fn aligned_divisions(
    session: &Session,
    node: &PlanRef,
    spec: &JoinSpec,
) -> PlanResult<Divisions> {
    let (left, right) = join_inputs(node)?;
    let left_meta = session.meta(left)?;
    let right_meta = session.meta(right)?;
    let left_div = session.divisions(left)?;
    let right_div = session.divisions(right)?;
    let left_n = left_div.npartitions();
    let right_n = right_div.npartitions();
    let indexed = joins_on_index(&left_meta, spec, JoinSide::Left)
        && joins_on_index(&right_meta, spec, JoinSide::Right)
        && left_div.is_known()
        && right_div.is_known();

    if left_n == right_n {
        if !indexed {
            return Ok(Divisions::unknown(left_n));
        }
        let merged = Divisions::merge(&left_div, &right_div);
        if merged.npartitions() == left_n {
            return Ok(merged);
        }
        return match (merged.first(), merged.last()) {
            (Some(lo), Some(hi)) if left_n == 1 => Divisions::new(vec![lo.clone(), hi.clone()]),
            _ => Ok(Divisions::unknown(left_n)),
        };
    }

    let (larger, larger_div) = if left_n > right_n {
        (left, left_div)
    } else {
        (right, right_div)
    };
    if indexed {
        return Ok(larger_div);
    }
    let carried = single_partition_divisions(session, node, spec, &left_meta, &right_meta)?;
    if carried.is_known() && carried == larger_div {
        return Ok(carried);
    }
    Ok(Divisions::unknown(session.npartitions(larger)?))
}

/// Reduce a multi-way index join to a tree of two-table `Merge` nodes.
///
/// `how == left` joins the first frame against the outer reduction of the rest;
/// anything else is a balanced tree of outer index joins.
pub fn reduce_join_recursive(
    session: &Session,
    frames: &[PlanRef],
    how: JoinType,
) -> PlanResult<PlanRef> {
    match frames {
        [] => Err(PlanError::InvalidPlan(
            "join_recursive needs at least one frame".to_string(),
        )),
        [only] => Ok(Arc::clone(only)),
        [first, rest @ ..] if how == JoinType::Left => {
            let right = recursive_outer(session, rest)?;
            session.merge(
                first,
                &right,
                JoinSpec::on_index(JoinType::Left),
                JoinHints::default(),
            )
        }
        _ => recursive_outer(session, frames),
    }
}

fn recursive_outer(session: &Session, frames: &[PlanRef]) -> PlanResult<PlanRef> {
    match frames {
        [] => Err(PlanError::InvalidPlan(
            "join_recursive needs at least one frame".to_string(),
        )),
        [only] => Ok(Arc::clone(only)),
        [a, b] => session.merge(a, b, JoinSpec::on_index(JoinType::Outer), JoinHints::default()),
        _ => {
            let mid = frames.len() / 2;
            let left = recursive_outer(session, &frames[..mid])?;
            let right = recursive_outer(session, &frames[mid..])?;
            session.merge(
                &left,
                &right,
                JoinSpec::on_index(JoinType::Outer),
                JoinHints::default(),
            )
        }
    }
}
