//! # HTTP Route Handlers
//!
//! Axum route handlers for the planning service.
//!
//! ## Planning Pipeline
//!
//! `POST /plan` runs the whole pipeline in one fresh session:
//!
//! 1. **Build**: register the request's tables and build the described plan.
//! 2. **Optimize**: apply the rewrite rules (filter and projection pushdown)
//!    until the plan stops changing.
//! 3. **Lower**: replace every abstract join with one physical strategy.
//! 4. **Emit**: build the task graph for the lowered plan.
//!
//! ## Error Handling
//!
//! Errors are returned as HTTP status codes with descriptive messages:
//! - 400 Bad Request: unknown tables or columns, schema mismatches, invalid plans
//! - 500 Internal Server Error: failures after the plan was accepted

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use partx_core::expr::OpKind;
use partx_core::physical::build_task_graph;
use partx_core::rewrite::Planner;
use partx_core::session::Session;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::protocol::{
    build_node, build_tables, PlanRequest, PlanResponse, RequestError, StrategyInfo,
};
use crate::state::AppState;

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /rules: list the registered rules in application order.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rules: Vec<RuleInfo> = state
        .rule_registry
        .rules
        .iter()
        .map(|r| RuleInfo {
            name: r.name().to_string(),
            rule_type: format!("{:?}", r.rule_type()),
        })
        .collect();

    Json(RulesResponse { rules })
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub name: String,
    pub rule_type: String,
}

/// POST /plan: build, optimize and lower a plan and emit its task graph.
pub async fn plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<PlanResponse>, (StatusCode, String)> {
    run_plan(&state, &req).map(Json).map_err(|err| {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        warn!("Planning failed ({}): {}", status, err);
        (status, err.to_string())
    })
}

/// The planning pipeline. Synchronous: the session is confined to this call.
pub fn run_plan(state: &AppState, req: &PlanRequest) -> Result<PlanResponse, RequestError> {
    let config = req.config.clone().unwrap_or_else(|| state.config.clone());
    let session = Session::new(config);

    let sources = build_tables(&session, &req.tables)?;
    let root = build_node(&session, &sources, &req.plan)?;

    let mut planner = Planner::new(&session, &state.rule_registry);
    let optimized = planner.optimize(&root)?;

    // strategies are read off the abstract joins before they are lowered
    let mut strategies = Vec::new();
    for node in optimized.post_order() {
        if matches!(node.kind(), OpKind::Merge | OpKind::SemiMerge) {
            let props = session.join_properties(&node)?;
            strategies.push(StrategyInfo {
                join: node.name(),
                strategy: props.strategy(),
                npartitions: props.npartitions(),
            });
        }
    }

    let lowered = planner.lower(&optimized)?;
    let graph = build_task_graph(&session, &lowered)?;
    debug!(
        "Planned {}: {} joins, {} tasks, {} rule applications",
        root.name(),
        strategies.len(),
        graph.len(),
        planner.applications()
    );

    Ok(PlanResponse {
        optimized: optimized.explain(),
        lowered: lowered.explain(),
        strategies,
        npartitions: graph.outputs.len(),
        tasks: graph.len(),
    })
}
