use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::backends::BackendCandidate;
use crate::http::server::{health_report, AppState};
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub backends: usize,
    pub breakers: usize,
}

#[derive(Serialize)]
pub struct ResetResult {
    pub reset: Vec<String>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: health_report(&state.breakers).status,
        routes: inner.routes.len(),
        backends: inner.backends.all_backends().len(),
        breakers: state.breakers.len(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.breakers.snapshots())
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Result<Json<ResetResult>, (StatusCode, String)> {
    if state.breakers.reset(&backend) {
        Ok(Json(ResetResult {
            reset: vec![backend],
        }))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("No circuit breaker for backend '{}'", backend),
        ))
    }
}

pub async fn reset_all_breakers(State(state): State<AppState>) -> Json<ResetResult> {
    let reset = state
        .breakers
        .snapshots()
        .into_iter()
        .map(|snapshot| snapshot.backend)
        .collect();
    state.breakers.reset_all();
    Json(ResetResult { reset })
}

/// Current candidate metrics per service.
pub async fn get_backends(
    State(state): State<AppState>,
) -> Json<HashMap<String, Vec<BackendCandidate>>> {
    Json(state.inner.load().backends.snapshot())
}
