use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use scriptgate_api::auth::AuthConfig;
use scriptgate_api::router::build_router;
use scriptgate_api::state::AppState;
use scriptgate_core::dispatcher::Dispatcher;
use scriptgate_core::pool::{ExecutionPool, PoolConfig};
use scriptgate_core::testing::FakeEngine;
use scriptgate_events::EventBus;

/// A small pool: one pre-warmed session, room for four.
pub fn test_pool_config() -> PoolConfig {
    PoolConfig {
        min_size: 1,
        max_size: Some(4),
        ..PoolConfig::default()
    }
}

/// Build the full application router on top of `engine`.
///
/// Uses the same `build_router` as `main.rs`, so tests exercise the
/// production middleware stack (request ID, tracing, panic recovery).
pub async fn build_test_app(engine: FakeEngine, auth: AuthConfig) -> (Router, Arc<EventBus>) {
    build_test_app_with(engine, auth, None).await
}

pub async fn build_test_app_with(
    engine: FakeEngine,
    auth: AuthConfig,
    request_timeout: Option<Duration>,
) -> (Router, Arc<EventBus>) {
    let pool = ExecutionPool::start(engine, test_pool_config())
        .await
        .expect("pool starts");
    let event_bus = Arc::new(EventBus::default());
    let state = AppState::new(
        Dispatcher::new(Arc::new(pool)),
        auth,
        Arc::clone(&event_bus),
    );
    (build_router(state, request_timeout), event_bus)
}

/// Send `request` and return the status and body text.
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// `GET uri` with no headers.
pub async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}
