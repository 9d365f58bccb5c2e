use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    handlers::{healthcheck, resolve_online_users},
    state::AppState,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/callback", post(resolve_online_users))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
