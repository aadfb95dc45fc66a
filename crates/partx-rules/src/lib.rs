//! # Built-in Join Planning Rules
//!
//! This crate provides the default rule set for the join planner. Rules are
//! divided into two categories:
//!
//! ## Rewrite Rules (Logical -> Logical)
//!
//! Applied top-down until no rule changes the plan. They move work below a
//! join boundary without changing results:
//!
//! - **`FilterPushdownRule`**: Splits a filter over a join into its conjuncts and
//!   filters each join input with the conjuncts it alone can answer.
//! - **`ProjectionPushdownRule`**: Narrows each join input to the columns the
//!   consumer of the join actually reads, plus the join keys.
//!
//! ## Lowering Rules (Logical -> Physical)
//!
//! Applied bottom-up once rewriting is done. Every logical join must be replaced:
//!
//! - **`LowerMergeRule`**: Picks exactly one physical strategy for a `Merge`
//!   (single-partition broadcast, indexed merge, broadcast, service shuffle or
//!   task shuffle).
//! - **`SemiJoinRule`**: Deduplicates the right input of a semi join on its key
//!   and hands the join to `LowerMergeRule`.
//! - **`JoinRecursiveRule`**: Reduces a multi-way index join to a tree of
//!   two-table joins.

pub mod filter_pushdown;
pub mod join_recursive;
pub mod lower_join;
pub mod projection_pushdown;
pub mod semi_join;

use partx_core::rule::RuleRegistry;

/// Create a rule registry with all built-in rules.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    // Rewrite rules: push work below joins.
    registry.add_rule(Box::new(filter_pushdown::FilterPushdownRule));
    registry.add_rule(Box::new(projection_pushdown::ProjectionPushdownRule));

    // Lowering rules: replace logical joins with physical strategies.
    registry.add_rule(Box::new(lower_join::LowerMergeRule));
    registry.add_rule(Box::new(semi_join::SemiJoinRule));
    registry.add_rule(Box::new(join_recursive::JoinRecursiveRule));

    registry
}
