//! # Values and Operator Types
//!
//! This module defines the closed set of operators a plan node can carry. They are
//! grouped in four layers:
//!
//! ## Scalar Operators (`ScalarOp`)
//! Elementwise computations over partitions: literals, comparisons, arithmetic,
//! boolean logic, membership tests and opaque functions. Predicates handed to a
//! `Filter` are graphs of these operators rooted over a frame node.
//!
//! ## Frame Operators (`FrameOp`)
//! Single-table operations: partitioned sources, column projection, index
//! extraction, row filtering, repartitioning, hash redistribution and
//! deduplication. The join layer calls these primitives but does not implement
//! their execution.
//!
//! ## Logical Joins (`LogicalJoin`)
//! Strategy-agnostic joins. They carry join semantics and hints and must be lowered
//! before a task graph can be emitted.
//!
//! ## Physical Joins (`PhysicalJoin`)
//! The concrete strategies a logical join lowers to. Each one knows how to emit a
//! recipe for every output partition.

use crate::divisions::Divisions;
use crate::schema::Schema;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Scalar value used for literals, boundary values and in-memory rows.
///
/// The derived ordering is structural (variants order before values) and only
/// serves as a tie-break; value comparisons go through [`ScalarValue::compare`].
/// `Float64` is wrapped in `OrderedFloat` so floats hash and compare
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(v.0),
            _ => None,
        }
    }

    /// Compare two values the way a predicate would: integers and floats compare
    /// numerically, nulls are incomparable.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Null, _) | (_, ScalarValue::Null) => None,
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => Some(a.cmp(b)),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Canonical form used when hashing join and shuffle keys, so that `1` and
    /// `1.0` land in the same bucket.
    pub fn hash_key(&self) -> ScalarValue {
        match self {
            ScalarValue::Int64(v) => ScalarValue::Float64(OrderedFloat(*v as f64)),
            other => other.clone(),
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Bool(_) => Some(DataType::Bool),
            ScalarValue::Int64(_) => Some(DataType::Int64),
            ScalarValue::Float64(_) => Some(DataType::Float64),
            ScalarValue::Utf8(_) => Some(DataType::Utf8),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int64(v) => write!(f, "{}", v),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(OrderedFloat(v))
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

/// Column and index data types carried by sample schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int64,
    Float64,
    Utf8,
    Category,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "string",
            DataType::Category => "category",
        };
        write!(f, "{}", name)
    }
}

/// Binary elementwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

impl BinaryOp {
    /// Whether the operator yields a boolean mask.
    pub fn is_predicate(&self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }
}

/// Unary elementwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    NotNull,
}

/// Relational join type.
///
/// `LeftSemi` returns the left rows that have at least one match on the right,
/// carrying only the left columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
    LeftSemi,
}

impl JoinType {
    /// Whether every left row survives the join unfiltered by it.
    pub fn preserves_left(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Outer)
    }

    /// Whether every right row survives the join unfiltered by it.
    pub fn preserves_right(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Outer)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Outer => "outer",
            JoinType::LeftSemi => "leftsemi",
        };
        write!(f, "{}", name)
    }
}

/// One side of a two-table join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn other(&self) -> JoinSide {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }
}

/// Transport used to redistribute rows by hash.
///
/// `Tasks` expresses the redistribution as transfer/barrier/collect tasks in the
/// graph itself. `Service` hands bucketing and synchronisation to an out-of-band
/// shuffle service addressed by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMethod {
    Tasks,
    #[serde(alias = "p2p")]
    Service,
}

impl Default for ShuffleMethod {
    fn default() -> Self {
        ShuffleMethod::Tasks
    }
}

/// Placeholder key name used when redistributing by an unnamed index.
pub const INDEX_PLACEHOLDER: &str = "_index";

/// The key rows are hashed by when they are redistributed or bucketed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleKey {
    /// Named columns. A name that is not a column but equals the index name
    /// selects the index.
    Columns(Vec<String>),
    /// The index values; the name is the index name or [`INDEX_PLACEHOLDER`].
    Index(String),
}

impl fmt::Display for ShuffleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShuffleKey::Columns(cols) => write!(f, "[{}]", cols.join(", ")),
            ShuffleKey::Index(name) => write!(f, "index({})", name),
        }
    }
}

/// Join semantics shared by the abstract operator and all of its lowerings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinSpec {
    pub how: JoinType,
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    pub left_index: bool,
    pub right_index: bool,
    pub suffixes: (String, String),
    pub indicator: bool,
}

impl Default for JoinSpec {
    fn default() -> Self {
        Self {
            how: JoinType::Inner,
            left_on: vec![],
            right_on: vec![],
            left_index: false,
            right_index: false,
            suffixes: ("_x".to_string(), "_y".to_string()),
            indicator: false,
        }
    }
}

impl JoinSpec {
    /// Join on identically named key columns.
    pub fn on(how: JoinType, keys: &[&str]) -> Self {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        Self {
            how,
            left_on: keys.clone(),
            right_on: keys,
            ..Default::default()
        }
    }

    /// Join on differently named key columns.
    pub fn on_columns(how: JoinType, left_on: &[&str], right_on: &[&str]) -> Self {
        Self {
            how,
            left_on: left_on.iter().map(|k| k.to_string()).collect(),
            right_on: right_on.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Join both sides on their index.
    pub fn on_index(how: JoinType) -> Self {
        Self {
            how,
            left_index: true,
            right_index: true,
            ..Default::default()
        }
    }

    pub fn with_suffixes(mut self, left: &str, right: &str) -> Self {
        self.suffixes = (left.to_string(), right.to_string());
        self
    }

    pub fn with_indicator(mut self, indicator: bool) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn with_how(mut self, how: JoinType) -> Self {
        self.how = how;
        self
    }

    pub fn keys(&self, side: JoinSide) -> &[String] {
        match side {
            JoinSide::Left => &self.left_on,
            JoinSide::Right => &self.right_on,
        }
    }

    pub fn index_flag(&self, side: JoinSide) -> bool {
        match side {
            JoinSide::Left => self.left_index,
            JoinSide::Right => self.right_index,
        }
    }
}

impl fmt::Display for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |index: bool, keys: &[String]| {
            if index {
                "index".to_string()
            } else {
                format!("[{}]", keys.join(", "))
            }
        };
        write!(
            f,
            "how={}, left={}, right={}",
            self.how,
            side(self.left_index, &self.left_on),
            side(self.right_index, &self.right_on)
        )?;
        if self.indicator {
            write!(f, ", indicator")?;
        }
        Ok(())
    }
}

/// Broadcast preference attached to a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BroadcastHint {
    /// Force broadcasting on (`true`) or off (`false`).
    Force(bool),
    /// Override the partition-count heuristic's bias.
    Bias(OrderedFloat<f64>),
}

/// Planner hints carried by an abstract join. None of them change results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinHints {
    pub shuffle_method: Option<ShuffleMethod>,
    pub npartitions: Option<usize>,
    pub broadcast: Option<BroadcastHint>,
}

impl JoinHints {
    pub fn with_npartitions(mut self, npartitions: usize) -> Self {
        self.npartitions = Some(npartitions);
        self
    }

    pub fn with_shuffle_method(mut self, method: ShuffleMethod) -> Self {
        self.shuffle_method = Some(method);
        self
    }

    pub fn with_broadcast(mut self, hint: BroadcastHint) -> Self {
        self.broadcast = Some(hint);
        self
    }
}

/// Target of a repartition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepartitionSpec {
    /// A number of output partitions.
    Partitions(usize),
    /// Explicit boundaries. `force` treats equal boundaries as a request too.
    Divisions { divisions: Divisions, force: bool },
}

/// Elementwise operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarOp {
    Literal(ScalarValue),
    Binop(BinaryOp),
    Unaryop(UnaryOp),
    IsIn(Vec<ScalarValue>),
    /// Opaque elementwise function; never treated as a recognised predicate shape.
    Function(String),
}

/// Single-table operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameOp {
    /// A partitioned table known to the execution substrate.
    Source {
        name: String,
        schema: Schema,
        divisions: Divisions,
    },
    Projection {
        columns: Vec<String>,
    },
    Index,
    /// Inputs: the frame and the boolean predicate.
    Filter,
    Repartition(RepartitionSpec),
    /// Hash redistribution over the task transport.
    Shuffle {
        on: ShuffleKey,
        npartitions_out: usize,
    },
    /// Partition-local deduplication on a key.
    DropDuplicates {
        on: ShuffleKey,
    },
}

/// Strategy-agnostic join operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalJoin {
    Merge { spec: JoinSpec, hints: JoinHints },
    /// A `leftsemi` merge that deduplicates its right input before joining.
    SemiMerge { spec: JoinSpec, hints: JoinHints },
    /// Index join of an ordered list of inputs.
    JoinRecursive { how: JoinType },
}

/// Physical join strategies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalJoin {
    /// Partition `i` of the left merged with partition `i` of the right; a
    /// single-partition input is broadcast to every output partition.
    AlignedMerge { spec: JoinSpec },
    /// The `side` input is replicated against every partition of the other input.
    /// `split_on` is the streaming side's key, used for local bucketing.
    Broadcast {
        spec: JoinSpec,
        side: JoinSide,
        split_on: ShuffleKey,
    },
    /// Hash redistribution and merge through an out-of-band shuffle service.
    ServiceShuffle {
        spec: JoinSpec,
        left_on: ShuffleKey,
        right_on: ShuffleKey,
        npartitions: Option<usize>,
    },
}

impl PhysicalJoin {
    pub fn spec(&self) -> &JoinSpec {
        match self {
            PhysicalJoin::AlignedMerge { spec }
            | PhysicalJoin::Broadcast { spec, .. }
            | PhysicalJoin::ServiceShuffle { spec, .. } => spec,
        }
    }
}

/// Unified operator enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Scalar(ScalarOp),
    Frame(FrameOp),
    Logical(LogicalJoin),
    Physical(PhysicalJoin),
}

impl Operator {
    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Operator::Physical(_))
    }

    /// Whether the operator computes elementwise over its inputs.
    pub fn is_elementwise(&self) -> bool {
        matches!(
            self,
            Operator::Scalar(
                ScalarOp::Binop(_)
                    | ScalarOp::Unaryop(_)
                    | ScalarOp::IsIn(_)
                    | ScalarOp::Function(_)
            )
        )
    }

    /// The join semantics of any join operator.
    pub fn join_spec(&self) -> Option<&JoinSpec> {
        match self {
            Operator::Logical(LogicalJoin::Merge { spec, .. })
            | Operator::Logical(LogicalJoin::SemiMerge { spec, .. }) => Some(spec),
            Operator::Physical(p) => Some(p.spec()),
            _ => None,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operator::Scalar(s) => match s {
                ScalarOp::Literal(_) => OpKind::Literal,
                ScalarOp::Binop(BinaryOp::And) => OpKind::And,
                ScalarOp::Binop(_) => OpKind::Binop,
                ScalarOp::Unaryop(_) => OpKind::Unaryop,
                ScalarOp::IsIn(_) => OpKind::IsIn,
                ScalarOp::Function(_) => OpKind::Function,
            },
            Operator::Frame(f) => match f {
                FrameOp::Source { .. } => OpKind::Source,
                FrameOp::Projection { .. } => OpKind::Projection,
                FrameOp::Index => OpKind::Index,
                FrameOp::Filter => OpKind::Filter,
                FrameOp::Repartition(_) => OpKind::Repartition,
                FrameOp::Shuffle { .. } => OpKind::Shuffle,
                FrameOp::DropDuplicates { .. } => OpKind::DropDuplicates,
            },
            Operator::Logical(l) => match l {
                LogicalJoin::Merge { .. } => OpKind::Merge,
                LogicalJoin::SemiMerge { .. } => OpKind::SemiMerge,
                LogicalJoin::JoinRecursive { .. } => OpKind::JoinRecursive,
            },
            Operator::Physical(p) => match p {
                PhysicalJoin::AlignedMerge { .. } => OpKind::AlignedMerge,
                PhysicalJoin::Broadcast { .. } => OpKind::BroadcastJoin,
                PhysicalJoin::ServiceShuffle { .. } => OpKind::ServiceShuffleJoin,
            },
        }
    }
}

/// Kind discriminant for pattern matching (without data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Literal,
    Binop,
    And,
    Unaryop,
    IsIn,
    Function,
    Source,
    Projection,
    Index,
    Filter,
    Repartition,
    Shuffle,
    DropDuplicates,
    Merge,
    SemiMerge,
    JoinRecursive,
    AlignedMerge,
    BroadcastJoin,
    ServiceShuffleJoin,
}

impl OpKind {
    /// Prefix of task names emitted for nodes of this kind.
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Literal => "literal",
            OpKind::Binop => "binop",
            OpKind::And => "and",
            OpKind::Unaryop => "unaryop",
            OpKind::IsIn => "isin",
            OpKind::Function => "map",
            OpKind::Source => "from-source",
            OpKind::Projection => "projection",
            OpKind::Index => "index",
            OpKind::Filter => "filter",
            OpKind::Repartition => "repartition",
            OpKind::Shuffle => "shuffle",
            OpKind::DropDuplicates => "drop-duplicates",
            OpKind::Merge => "merge",
            OpKind::SemiMerge => "semi-merge",
            OpKind::JoinRecursive => "join-recursive",
            OpKind::AlignedMerge => "blockwise-merge",
            OpKind::BroadcastJoin => "broadcast-join",
            OpKind::ServiceShuffleJoin => "hash-join-service",
        }
    }
}
