//! Planner configuration.

use crate::expr::ShuffleMethod;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Configuration knobs for planning.
///
/// `broadcast_bias` scales the partition-count heuristic: a join broadcasts its
/// smaller side when `min(n) < log2(max(n)) * broadcast_bias`. A per-join float
/// broadcast hint overrides it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub broadcast_bias: f64,
    /// Transport used by joins that carry no shuffle hint.
    pub shuffle_method: ShuffleMethod,
    /// Upper bound on rewrite passes and on lowering applications.
    pub max_iterations: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            broadcast_bias: 0.5,
            shuffle_method: ShuffleMethod::Tasks,
            max_iterations: 10_000,
        }
    }
}

impl PlannerConfig {
    /// Defaults overridden by `PARTX_BROADCAST_BIAS`, `PARTX_SHUFFLE_METHOD` and
    /// `PARTX_MAX_ITERATIONS`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(bias) = parse_var(&lookup, "PARTX_BROADCAST_BIAS") {
            config.broadcast_bias = bias;
        }
        if let Some(raw) = lookup("PARTX_SHUFFLE_METHOD") {
            match raw.to_ascii_lowercase().as_str() {
                "tasks" => config.shuffle_method = ShuffleMethod::Tasks,
                "service" | "p2p" => config.shuffle_method = ShuffleMethod::Service,
                other => warn!("Ignoring PARTX_SHUFFLE_METHOD={}", other),
            }
        }
        if let Some(max) = parse_var(&lookup, "PARTX_MAX_ITERATIONS") {
            config.max_iterations = max;
        }
        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.broadcast_bias, 0.5);
        assert_eq!(config.shuffle_method, ShuffleMethod::Tasks);
        assert_eq!(config.max_iterations, 10_000);
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PARTX_BROADCAST_BIAS", "0.25"),
            ("PARTX_SHUFFLE_METHOD", "p2p"),
            ("PARTX_MAX_ITERATIONS", "nope"),
        ]
        .into_iter()
        .collect();
        let config = PlannerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.broadcast_bias, 0.25);
        assert_eq!(config.shuffle_method, ShuffleMethod::Service);
        assert_eq!(config.max_iterations, 10_000);
    }

    #[test]
    fn test_partial_json() {
        let config: PlannerConfig = serde_json::from_str(r#"{"broadcast_bias": 2.0}"#).unwrap();
        assert_eq!(config.broadcast_bias, 2.0);
        assert_eq!(config.max_iterations, 10_000);
    }
}
