//! Download job routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/new` | Register a URL and start its download |
//! | GET | `/urls` | Snapshots of all live sessions |
//! | GET | `/urls/{id}` | The stored request |
//! | DELETE | `/urls/{id}` | Cancel and forget a job |
//! | POST | `/urls/{id}/restart` | Run a known job again |

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use tracing::info;

use crate::Error;
use crate::api::error::ApiResult;
use crate::api::models::{DeletionResponse, NewUrlForm, NewUrlResponse};
use crate::api::requests::Request;
use crate::api::server::AppState;
use crate::downloader::SessionInfo;
use crate::utils::url::destination_host;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new_url))
        .route("/urls", get(list_downloads))
        .route("/urls/{id}", get(get_download).delete(delete_download))
        .route("/urls/{id}/restart", post(restart_download))
}

async fn new_url(
    State(state): State<AppState>,
    Form(form): Form<NewUrlForm>,
) -> ApiResult<Json<NewUrlResponse>> {
    if form.url.is_empty() {
        return Err(Error::EmptyRequest.into());
    }
    destination_host(&form.url)?;

    let key = state.requests.insert(&form.url)?;
    let total_downloads = state.requests.len();
    info!(job_key = %key, url = %form.url, total_downloads, "new request registered");

    state.download_manager.new_download(&key, &form.url);

    Ok(Json(NewUrlResponse {
        url: form.url,
        sha_key: key,
        total_downloads,
    }))
}

async fn list_downloads(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.download_manager.sessions_info())
}

async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Request>> {
    let mut request = state.requests.retrieve(&id)?;
    if let Some(info) = state.download_manager.session_info(&id) {
        request.status = info.status.to_string();
    }
    Ok(Json(request))
}

async fn delete_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletionResponse>> {
    state.requests.retrieve(&id)?;

    let deletion = state.download_manager.cancel_download(&id);
    state.requests.remove(&id);
    info!(job_key = %id, deletion, "request deleted");

    Ok(Json(DeletionResponse { deletion }))
}

async fn restart_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Option<SessionInfo>>> {
    let request = state.requests.retrieve(&id)?;
    state.download_manager.new_download(&id, &request.url);
    Ok(Json(state.download_manager.session_info(&id)))
}
