#[cfg(test)]
mod tests;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, middleware};

pub fn build_router(app_state: AppState) -> Router {
    let admin_only = from_fn_with_state(app_state.clone(), middleware::require_admin_token);

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route(
            "/api/requests",
            get(handlers::requests::list_requests_handler)
                .route_layer(admin_only.clone())
                .post(handlers::requests::submit_request_handler),
        )
        .route(
            "/api/requests/{request_id}",
            get(handlers::requests::get_request_handler).route_layer(admin_only.clone()),
        )
        .route(
            "/api/requests/{request_id}/approve",
            post(handlers::requests::approve_request_handler).route_layer(admin_only.clone()),
        )
        .route(
            "/api/requests/{request_id}/revoke",
            post(handlers::requests::revoke_request_handler).route_layer(admin_only),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
