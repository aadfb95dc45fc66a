//! # Rule System
//!
//! This module defines the rule trait and rule registry that drive planning.
//!
//! ## Rule Types
//!
//! There are two kinds of plan rules:
//!
//! - **Rewrite rules** (`RuleType::Rewrite`): replace a subplan by an equivalent
//!   one that computes the same rows, typically moving filters and projections
//!   below a join. They are applied by the fixpoint driver until no node changes.
//!
//! - **Lowering rules** (`RuleType::Lowering`): replace an abstract join by exactly
//!   one physical strategy (plus whatever repartitioning or redistribution of its
//!   inputs the strategy requires). Applied once per abstract join by the
//!   lowering driver.
//!
//! ## Pattern Matching
//!
//! Each rule declares a `Pattern` that describes the structure it matches against.
//! The drivers check the pattern before calling `apply`.
//!
//! ## Consumers
//!
//! During a rewrite pass the context carries the readers of every node of the
//! plan as it stood at the start of the pass. A rule that changes what a shared
//! node computes (projection pushdown narrows a join) must account for all of
//! them, and declines for nodes the pass has just built.
//!
//! ## No Change
//!
//! `apply` returns `Ok(None)` when the rule declines to rewrite (an unrecognised
//! predicate shape, a projection that would not narrow anything). Declining is
//! never an error.

use crate::error::PlanResult;
use crate::plan::{Consumers, PlanRef};
use crate::pattern::Pattern;
use crate::session::Session;

/// Classification of plan rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Logical → logical rewrite (e.g., filter pushdown).
    Rewrite,
    /// Abstract join → physical strategy.
    Lowering,
}

/// Context passed to rules during application.
pub struct RuleContext<'a> {
    pub session: &'a Session,
    /// Readers of every node in the plan being rewritten. `None` when a rule is
    /// applied outside a driver pass.
    pub consumers: Option<&'a Consumers>,
}

impl<'a> RuleContext<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            consumers: None,
        }
    }

    pub fn with_consumers(session: &'a Session, consumers: &'a Consumers) -> Self {
        Self {
            session,
            consumers: Some(consumers),
        }
    }
}

/// A rule rewrites or lowers plan nodes.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    /// Whether this rule is a rewrite or lowering rule.
    fn rule_type(&self) -> RuleType;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Apply the rule to a matching node. `Ok(None)` means "no change".
    fn apply(&self, node: &PlanRef, ctx: &RuleContext) -> PlanResult<Option<PlanRef>>;
}

/// Registry of plan rules, in application order.
pub struct RuleRegistry {
    pub rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// All rewrite rules.
    pub fn rewrite_rules(&self) -> Vec<&dyn Rule> {
        self.of_type(RuleType::Rewrite)
    }

    /// All lowering rules.
    pub fn lowering_rules(&self) -> Vec<&dyn Rule> {
        self.of_type(RuleType::Lowering)
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    fn of_type(&self, rule_type: RuleType) -> Vec<&dyn Rule> {
        self.rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| r.rule_type() == rule_type)
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
