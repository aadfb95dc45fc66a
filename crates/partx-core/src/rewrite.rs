//! # Rewrite and Lowering Drivers
//!
//! Planning runs in two phases over an immutable plan:
//!
//! 1. **Optimize** (`Planner::optimize`): repeated top-down passes. Within a pass
//!    each node is visited once (memoized by identity); every rewrite rule whose
//!    pattern matches is applied until none fires, then the node's inputs are
//!    visited and the node is rebuilt over the rewritten inputs. Passes repeat
//!    until a pass returns the same root identity. Rules see the readers of
//!    every node of the plan the pass started from.
//!
//! 2. **Lower** (`Planner::lower`): bottom-up. Every node whose operator is an
//!    abstract join is replaced by the result of the first lowering rule that
//!    accepts it, and that result is lowered again until no abstract join remains.
//!    An abstract join that no rule accepts is an `InvalidPlan` error.
//!
//! ## Termination
//!
//! `PlannerConfig::max_iterations` bounds the number of optimize passes and the
//! number of rule applications. Exhausting it during optimization keeps the best
//! plan reached so far; exhausting it during lowering is an error, since a plan
//! with abstract joins left in it cannot be executed.

use crate::error::{PlanError, PlanResult};
use crate::pattern::matches;
use crate::plan::{Consumers, NodeId, PlanRef};
use crate::rule::{RuleContext, RuleRegistry};
use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Drives rewrite and lowering rules over plans built in one session.
pub struct Planner<'a> {
    pub session: &'a Session,
    pub registry: &'a RuleRegistry,
    /// Running count of rule applications across both phases.
    applications: usize,
}

impl<'a> Planner<'a> {
    pub fn new(session: &'a Session, registry: &'a RuleRegistry) -> Self {
        Self {
            session,
            registry,
            applications: 0,
        }
    }

    pub fn applications(&self) -> usize {
        self.applications
    }

    /// Apply rewrite rules until the plan stops changing.
    pub fn optimize(&mut self, root: &PlanRef) -> PlanResult<PlanRef> {
        let max = self.session.config().max_iterations;
        debug!(
            "Starting rewrite: root={}, rules={}",
            root.name(),
            self.registry.rewrite_rules().len()
        );
        let mut current = Arc::clone(root);
        for pass in 0..max {
            let mut memo = HashMap::new();
            let consumers = Consumers::of_plan(&current);
            let next = self.rewrite_node(&current, &consumers, &mut memo)?;
            if next.id() == current.id() {
                debug!(
                    "Rewrite reached fixpoint after {} passes ({} applications)",
                    pass + 1,
                    self.applications
                );
                return Ok(next);
            }
            current = next;
            if self.budget_exhausted() {
                break;
            }
        }
        debug!("Rewrite budget exhausted; keeping {}", current.name());
        Ok(current)
    }

    fn rewrite_node(
        &mut self,
        node: &PlanRef,
        consumers: &Consumers,
        memo: &mut HashMap<NodeId, PlanRef>,
    ) -> PlanResult<PlanRef> {
        if let Some(done) = memo.get(&node.id()) {
            return Ok(Arc::clone(done));
        }
        let ctx = RuleContext::with_consumers(self.session, consumers);
        let mut current = Arc::clone(node);
        'rules: while !self.budget_exhausted() {
            for rule in self.registry.rewrite_rules() {
                if !matches(&current, &rule.pattern()) {
                    continue;
                }
                if let Some(next) = rule.apply(&current, &ctx)? {
                    if next.id() == current.id() {
                        continue;
                    }
                    self.applications += 1;
                    trace!("{}: {} -> {}", rule.name(), current.name(), next.name());
                    current = next;
                    continue 'rules;
                }
            }
            break;
        }
        let inputs = current
            .inputs()
            .iter()
            .map(|input| self.rewrite_node(input, consumers, memo))
            .collect::<PlanResult<Vec<_>>>()?;
        let rebuilt = self.session.with_inputs(&current, inputs);
        memo.insert(node.id(), Arc::clone(&rebuilt));
        Ok(rebuilt)
    }

    /// Replace every abstract join by a physical strategy.
    pub fn lower(&mut self, root: &PlanRef) -> PlanResult<PlanRef> {
        debug!("Starting lowering: root={}", root.name());
        let mut memo = HashMap::new();
        let lowered = self.lower_node(root, &mut memo)?;
        debug!(
            "Lowering complete: root={}, {} applications",
            lowered.name(),
            self.applications
        );
        Ok(lowered)
    }

    fn lower_node(
        &mut self,
        node: &PlanRef,
        memo: &mut HashMap<NodeId, PlanRef>,
    ) -> PlanResult<PlanRef> {
        if let Some(done) = memo.get(&node.id()) {
            return Ok(Arc::clone(done));
        }
        let inputs = node
            .inputs()
            .iter()
            .map(|input| self.lower_node(input, memo))
            .collect::<PlanResult<Vec<_>>>()?;
        let mut current = self.session.with_inputs(node, inputs);

        if current.op().is_logical() {
            if self.budget_exhausted() {
                return Err(PlanError::InvalidPlan(format!(
                    "lowering exceeded {} rule applications",
                    self.session.config().max_iterations
                )));
            }
            let next = self.apply_lowering(&current)?;
            self.applications += 1;
            current = self.lower_node(&next, memo)?;
        }
        memo.insert(node.id(), Arc::clone(&current));
        Ok(current)
    }

    fn apply_lowering(&self, node: &PlanRef) -> PlanResult<PlanRef> {
        let ctx = RuleContext::new(self.session);
        for rule in self.registry.lowering_rules() {
            if !matches(node, &rule.pattern()) {
                continue;
            }
            if let Some(next) = rule.apply(node, &ctx)? {
                if next.id() != node.id() {
                    debug!("{}: {} -> {}", rule.name(), node.name(), next.name());
                    return Ok(next);
                }
            }
        }
        Err(PlanError::InvalidPlan(format!(
            "no lowering rule accepts {}",
            node.op()
        )))
    }

    /// Optimize, then lower.
    pub fn plan(&mut self, root: &PlanRef) -> PlanResult<PlanRef> {
        let optimized = self.optimize(root)?;
        self.lower(&optimized)
    }

    fn budget_exhausted(&self) -> bool {
        self.applications >= self.session.config().max_iterations
    }
}
