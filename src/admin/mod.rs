//! Admin API.
//!
//! Served on its own listener so it can stay bound to loopback while the
//! gateway listener is public. Every route requires the configured bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/reset", post(reset_all_breakers))
        .route("/admin/breakers/{backend}/reset", post(reset_breaker))
        .route("/admin/backends", get(get_backends))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
