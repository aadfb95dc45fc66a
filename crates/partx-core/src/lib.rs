//! # partx-core: Join Planning Core for Partitioned Lazy Frames
//!
//! This crate implements the data structures and algorithms that plan joins over
//! partitioned tables: the expression substrate joins are planned against, the
//! abstract join operator and its strategy choice, the recipe emitters for the
//! physical strategies, and an in-memory executor to run the emitted recipes.
//!
//! ## Module Overview
//!
//! - **`expr`**: Scalar values, dtypes, join semantics, hints and the closed
//!   operator enum (elementwise, frame, logical join, physical join).
//! - **`schema`**: Sample schemas and the merge schema rule (`MergeLayout`).
//! - **`divisions`**: The partition boundary model and boundary merging.
//! - **`plan`**: Content-addressed, immutable plan nodes.
//! - **`session`**: Node interning, pure substitution and memoized derived
//!   properties (schema, divisions, join properties) for one planning run.
//! - **`builder`**: Node constructors on the session.
//! - **`join`**: The abstract join's property view and strategy precedence, plus
//!   the multi-way join reducer.
//! - **`rule`** / **`pattern`**: The rule trait, rule registry and declarative
//!   patterns.
//! - **`rewrite`**: The rewrite fixpoint driver and the lowering driver.
//! - **`task`**: Task recipes, task graphs and the shuffle service interface.
//! - **`physical`**: Recipe emission for every operator, including the four
//!   physical join strategies.
//! - **`local`**: Reference in-memory execution of task graphs.
//! - **`config`**: Planner configuration.
//! - **`error`**: The planning error type.

pub mod builder;
pub mod config;
pub mod divisions;
pub mod error;
pub mod expr;
pub mod join;
pub mod local;
pub mod pattern;
pub mod physical;
pub mod plan;
pub mod rewrite;
pub mod rule;
pub mod schema;
pub mod session;
pub mod task;
