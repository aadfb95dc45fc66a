//! # Plan Request Protocol
//!
//! JSON description of a query over partitioned tables, and its translation into
//! a plan built in a fresh planning session.
//!
//! ## Wire Protocol
//!
//! - Request: `POST /plan` with a JSON body (`PlanRequest`)
//! - Response: JSON body (`PlanResponse`) with the explained optimized and
//!   lowered plans, the strategy chosen for each join and the emitted task count
//!
//! ```json
//! {
//!   "tables": [
//!     {"name": "orders", "columns": [{"name": "cust", "dtype": "int64"}], "npartitions": 64},
//!     {"name": "customers", "columns": [{"name": "cust", "dtype": "int64"}],
//!      "index": {"name": "id", "dtype": "int64"}, "divisions": [0, 500, 1000]}
//!   ],
//!   "plan": {"type": "merge", "how": "left", "on": ["cust"],
//!            "left": {"type": "table", "name": "orders"},
//!            "right": {"type": "table", "name": "customers"}}
//! }
//! ```

use partx_core::config::PlannerConfig;
use partx_core::divisions::Divisions;
use partx_core::error::PlanError;
use partx_core::expr::{
    BinaryOp, BroadcastHint, DataType, JoinHints, JoinSpec, JoinType, ScalarValue, ShuffleMethod,
};
use partx_core::join::JoinStrategy;
use partx_core::plan::PlanRef;
use partx_core::schema::{Field, IndexField, Schema};
use partx_core::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// JSON wire-protocol types
// ---------------------------------------------------------------------------

/// Request body for `POST /plan`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub tables: Vec<TableInfo>,
    pub plan: NodeSpec,
    /// Replaces the server's planner config for this request.
    #[serde(default)]
    pub config: Option<PlannerConfig>,
}

/// A partitioned source table.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// Defaults to an unnamed int64 index.
    #[serde(default)]
    pub index: Option<IndexInfo>,
    /// Known partition boundaries. Without them the table has `npartitions`
    /// partitions of unknown extent.
    #[serde(default)]
    pub divisions: Option<Vec<ScalarValue>>,
    #[serde(default)]
    pub npartitions: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: DataType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    #[serde(default)]
    pub name: Option<String>,
    pub dtype: DataType,
}

/// A plan node.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Table { name: String },
    Merge(JoinInfo),
    SemiMerge(JoinInfo),
    JoinRecursive {
        frames: Vec<NodeSpec>,
        #[serde(default = "default_how")]
        how: JoinType,
    },
    /// Rows satisfying every condition.
    Filter {
        input: Box<NodeSpec>,
        conditions: Vec<Condition>,
    },
    Project {
        input: Box<NodeSpec>,
        columns: Vec<String>,
    },
}

/// A two-table join and its hints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinInfo {
    pub left: Box<NodeSpec>,
    pub right: Box<NodeSpec>,
    #[serde(default = "default_how")]
    pub how: JoinType,
    /// Keys named the same on both sides.
    #[serde(default)]
    pub on: Vec<String>,
    #[serde(default)]
    pub left_on: Vec<String>,
    #[serde(default)]
    pub right_on: Vec<String>,
    #[serde(default)]
    pub left_index: bool,
    #[serde(default)]
    pub right_index: bool,
    #[serde(default)]
    pub suffixes: Option<(String, String)>,
    #[serde(default)]
    pub indicator: bool,
    #[serde(default)]
    pub npartitions: Option<usize>,
    #[serde(default)]
    pub shuffle_method: Option<ShuffleMethod>,
    /// `true`/`false` forces broadcasting on or off; a number overrides the bias.
    #[serde(default)]
    pub broadcast: Option<BroadcastHint>,
}

fn default_how() -> JoinType {
    JoinType::Inner
}

/// `column <op> value`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub column: String,
    pub op: BinaryOp,
    pub value: ScalarValue,
}

/// Response body for `POST /plan`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub optimized: String,
    pub lowered: String,
    pub strategies: Vec<StrategyInfo>,
    pub npartitions: usize,
    pub tasks: usize,
}

/// Strategy selected for one abstract join of the optimized plan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub join: String,
    pub strategy: JoinStrategy,
    pub npartitions: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a request could not be planned.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Unknown table '{0}'")]
    UnknownTable(String),
    #[error("Table '{0}' is declared twice")]
    DuplicateTable(String),
    #[error("Table '{0}' needs divisions or npartitions")]
    MissingPartitions(String),
    #[error("Table '{name}' declares {npartitions} partitions but {divisions} divisions")]
    PartitionMismatch {
        name: String,
        npartitions: usize,
        divisions: usize,
    },
    #[error("Condition on '{0}' must use a comparison operator")]
    NotAComparison(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl RequestError {
    /// Malformed requests and invalid plans are client errors; failures past
    /// plan validation are server errors.
    pub fn is_client_error(&self) -> bool {
        match self {
            RequestError::Plan(err) => matches!(
                err,
                PlanError::SchemaMismatch { .. }
                    | PlanError::UnknownColumn(_)
                    | PlanError::InvalidPlan(_)
            ),
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan construction
// ---------------------------------------------------------------------------

/// Register the request's tables as sources.
pub fn build_tables(
    session: &Session,
    tables: &[TableInfo],
) -> Result<HashMap<String, PlanRef>, RequestError> {
    let mut sources = HashMap::new();
    for table in tables {
        if sources.contains_key(&table.name) {
            return Err(RequestError::DuplicateTable(table.name.clone()));
        }
        let index = match &table.index {
            Some(IndexInfo { name: Some(name), dtype }) => IndexField::named(name.clone(), *dtype),
            Some(IndexInfo { name: None, dtype }) => IndexField::unnamed(*dtype),
            None => IndexField::unnamed(DataType::Int64),
        };
        let schema = Schema::new(
            table
                .columns
                .iter()
                .map(|c| Field::new(c.name.clone(), c.dtype))
                .collect(),
            index,
        );
        let divisions = match (&table.divisions, table.npartitions) {
            (Some(values), n) => {
                let divisions = Divisions::new(values.clone())?;
                if let Some(n) = n.filter(|n| *n != divisions.npartitions()) {
                    return Err(RequestError::PartitionMismatch {
                        name: table.name.clone(),
                        npartitions: n,
                        divisions: values.len(),
                    });
                }
                divisions
            }
            (None, Some(n)) => Divisions::unknown(n),
            (None, None) => return Err(RequestError::MissingPartitions(table.name.clone())),
        };
        let source = session.source(&table.name, schema, divisions);
        sources.insert(table.name.clone(), source);
    }
    Ok(sources)
}

/// Build the plan a node describes.
pub fn build_node(
    session: &Session,
    sources: &HashMap<String, PlanRef>,
    node: &NodeSpec,
) -> Result<PlanRef, RequestError> {
    match node {
        NodeSpec::Table { name } => sources
            .get(name)
            .cloned()
            .ok_or_else(|| RequestError::UnknownTable(name.clone())),
        NodeSpec::Merge(join) | NodeSpec::SemiMerge(join) => {
            let left = build_node(session, sources, &join.left)?;
            let right = build_node(session, sources, &join.right)?;
            let (spec, hints) = join_spec(join);
            let built = if matches!(node, NodeSpec::SemiMerge(_)) {
                session.semi_merge(&left, &right, spec, hints)?
            } else {
                session.merge(&left, &right, spec, hints)?
            };
            Ok(built)
        }
        NodeSpec::JoinRecursive { frames, how } => {
            let frames = frames
                .iter()
                .map(|f| build_node(session, sources, f))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(session.join_recursive(&frames, *how)?)
        }
        NodeSpec::Filter { input, conditions } => {
            let frame = build_node(session, sources, input)?;
            let mut predicate: Option<PlanRef> = None;
            for condition in conditions {
                if !is_comparison(condition.op) {
                    return Err(RequestError::NotAComparison(condition.column.clone()));
                }
                let column = session.col(&frame, &condition.column);
                let test = session.compare(condition.op, &column, condition.value.clone());
                predicate = Some(match predicate {
                    Some(p) => session.and(&p, &test),
                    None => test,
                });
            }
            let filtered = match predicate {
                Some(p) => session.filter(&frame, &p),
                None => frame,
            };
            // surface unknown columns now rather than while planning
            session.meta(&filtered)?;
            Ok(filtered)
        }
        NodeSpec::Project { input, columns } => {
            let frame = build_node(session, sources, input)?;
            let projected = session.project_owned(&frame, columns.clone());
            session.meta(&projected)?;
            Ok(projected)
        }
    }
}

fn join_spec(join: &JoinInfo) -> (JoinSpec, JoinHints) {
    let (left_on, right_on) = if join.on.is_empty() {
        (join.left_on.clone(), join.right_on.clone())
    } else {
        (join.on.clone(), join.on.clone())
    };
    let mut spec = JoinSpec {
        how: join.how,
        left_on,
        right_on,
        left_index: join.left_index,
        right_index: join.right_index,
        indicator: join.indicator,
        ..Default::default()
    };
    if let Some((l, r)) = &join.suffixes {
        spec = spec.with_suffixes(l, r);
    }
    let hints = JoinHints {
        shuffle_method: join.shuffle_method,
        npartitions: join.npartitions,
        broadcast: join.broadcast,
    };
    (spec, hints)
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
    )
}
