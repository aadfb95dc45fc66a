//! # Application State
//!
//! Shared state available to all HTTP request handlers. It is created once at
//! server startup and shared via `Arc` across all concurrent requests.
//!
//! ## Components
//!
//! - **Rule Registry**: the rewrite and lowering rules. Shared (not rebuilt per
//!   request) because rules are stateless.
//! - **Planner Config**: the default broadcast bias, shuffle transport and
//!   iteration budget, read from the environment at startup. A request may carry
//!   its own config, which replaces this one for that request.
//!
//! Planning sessions are not shared: each request builds its own `Session`,
//! whose caches live only as long as the request.

use partx_core::config::PlannerConfig;
use partx_core::rule::RuleRegistry;

pub struct AppState {
    pub rule_registry: RuleRegistry,
    pub config: PlannerConfig,
}

impl AppState {
    /// Built-in rules with the environment's planner config.
    pub fn new() -> Self {
        Self::with_config(PlannerConfig::from_env())
    }

    pub fn with_config(config: PlannerConfig) -> Self {
        Self {
            rule_registry: partx_rules::default_rule_registry(),
            config,
        }
    }
}
