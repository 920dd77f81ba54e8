//! Logging API routes.
//!
//! View and change the log filter at runtime.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

fn logging_config(state: &AppState) -> ApiResult<&LoggingConfig> {
    state
        .logging_config
        .as_deref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))
}

fn config_response(logging_config: &LoggingConfig) -> LoggingConfigResponse {
    let modules = available_modules()
        .into_iter()
        .map(|(name, desc)| ModuleInfo {
            name: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    LoggingConfigResponse {
        filter: logging_config.get_filter(),
        available_modules: modules,
    }
}

async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = logging_config(&state)?;
    Ok(Json(config_response(logging_config)))
}

async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging_config = logging_config(&state)?;
    logging_config.set_filter(&request.filter)?;
    Ok(Json(config_response(logging_config)))
}
