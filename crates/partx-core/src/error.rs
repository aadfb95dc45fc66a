//! # Planning Errors
//!
//! Every fallible planning operation returns [`PlanResult`]. Schema problems are
//! raised while deriving sample schemas, so they surface during planning and never
//! reach execution. Rules that cannot rewrite a plan do not error; they return
//! `Ok(None)` and leave the plan alone.

/// Errors raised while building, rewriting, lowering or executing a plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// Two join keys (or aligned columns) carry incompatible dtypes.
    #[error("Schema mismatch on '{column}': {left} is not compatible with {right}")]
    SchemaMismatch {
        column: String,
        left: String,
        right: String,
    },
    /// A column referenced by a projection, key or predicate does not exist.
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
    /// The plan is structurally invalid (wrong arity, missing lowering, ...).
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    /// A task argument references a key the graph does not contain.
    #[error("Missing task: {0}")]
    MissingTask(String),
    /// A task failed while running on the reference executor.
    #[error("Execution error: {0}")]
    Execution(String),
    /// A shuffle session was cancelled before all of its output was read.
    #[error("Shuffle '{0}' was cancelled")]
    Cancelled(String),
}

pub type PlanResult<T> = Result<T, PlanError>;
