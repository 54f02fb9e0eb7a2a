use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use scriptgate_core::pool::PoolStats;
use scriptgate_core::scripting::engine::ScriptEngine;

use crate::handlers::invoke::invoke;
use crate::state::AppState;

/// Path reserved for the health check. Other methods on it are ordinary
/// invocations.
pub const HEALTH_PATH: &str = "/_health";

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` (AMQP configured but disconnected) or `shutting_down`.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub pool: PoolStats,
    /// `None` when the AMQP front-end is not configured.
    pub amqp_connected: Option<bool>,
}

/// GET /_health -- returns pool counters and front-end connectivity.
async fn health_check<E: ScriptEngine>(State(state): State<AppState<E>>) -> Json<HealthResponse> {
    let pool = state.dispatcher.pool();
    let amqp_connected = state.amqp_status.as_ref().map(|s| s.is_connected());

    let status = if pool.is_closed() {
        "shutting_down"
    } else if amqp_connected == Some(false) {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        pool: pool.stats(),
        amqp_connected,
    })
}

pub fn router<E: ScriptEngine>() -> Router<AppState<E>> {
    Router::new().route(HEALTH_PATH, get(health_check::<E>).fallback(invoke::<E>))
}
