//! # partx-server: HTTP Planning Service for Partitioned Joins
//!
//! This binary crate exposes the join planner as a network service. A client
//! describes its partitioned tables and a query over them; the service plans the
//! query and reports which physical strategy each join lowers to and how large
//! the resulting task graph is.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   | HTTP POST /plan (JSON tables + plan tree)
//!   v
//! partx-server (this binary)
//!   |
//!   +-> protocol: build sources and the plan in a fresh session
//!   +-> rewrite: filter and projection pushdown to a fixpoint
//!   +-> lowering: one physical strategy per join
//!   +-> emission: task graph for the lowered plan
//!   |
//!   | HTTP response (explained plans, strategies, task count)
//!   v
//! Client
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health` - Health check
//! - `GET  /rules`  - List the registered rules
//! - `POST /plan`   - Plan a query (JSON, see `protocol`)
//!
//! ## Configuration
//!
//! The server listens on `PARTX_ADDR` (default `0.0.0.0:3000`). The planner
//! defaults come from `PARTX_BROADCAST_BIAS`, `PARTX_SHUFFLE_METHOD` and
//! `PARTX_MAX_ITERATIONS`. Logging is controlled by the `RUST_LOG` environment
//! variable (defaults to `partx=debug`).

mod protocol;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("partx=debug".parse()?))
        .init();

    let state = Arc::new(state::AppState::new());
    tracing::debug!("Planner config: {:?}", state.config);

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/plan", post(routes::plan))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::env::var("PARTX_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("partx-server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
