//! Health check route.

use axum::{Json, Router, routing::get};

use crate::api::models::AliveResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

async fn health_check() -> Json<AliveResponse> {
    Json(AliveResponse { alive: true })
}
