//! 路由与请求级中间件。

use crate::AppState;
use crate::handlers;
use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_snapshot))
        .route("/devices", get(handlers::devices))
        .route("/history/:device/:parameter", get(handlers::history))
        .with_state(state)
        // 注入 x-request-id 并挂请求级追踪
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}
