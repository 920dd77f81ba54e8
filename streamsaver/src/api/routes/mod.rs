//! API route modules.

pub mod downloads;
pub mod health;
pub mod logging;

use axum::Router;

use crate::api::server::AppState;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(downloads::router())
        .nest("/logging", logging::router())
        .with_state(state)
}
