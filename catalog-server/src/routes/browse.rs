use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use catalog_core::{BrowseRequest, BrowseResult, RestoreReport};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/entities/{id}/browse", post(browse))
        .route("/api/entities/{id}/restore", post(restore))
        .route("/api/browse/{request_id}", delete(cancel))
}

#[derive(Deserialize, Default)]
pub struct BrowseBody {
    #[serde(default)]
    pub job_id: Option<i64>,
    #[serde(default)]
    pub from_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub show_deleted: bool,
    /// Lets a client cancel the request through DELETE /api/browse/{request_id}
    #[serde(default)]
    pub request_id: Option<String>,
    /// Restore only: directory name under the restores root
    #[serde(default)]
    pub name: Option<String>,
}

impl BrowseBody {
    fn to_request(&self, entity_id: &str) -> BrowseRequest {
        BrowseRequest {
            entity_id: entity_id.to_string(),
            job_id: self.job_id,
            from_time: self.from_time,
            to_time: self.to_time,
            show_deleted: self.show_deleted,
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn browse(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(body): Json<BrowseBody>,
) -> Result<Json<BrowseResult>, AppError> {
    let request = body.to_request(&entity_id);
    let request_id = body.request_id;
    let cancel = state.track_browse(request_id.as_deref());

    let result = blocking(&state, move |engine| {
        engine.resolver().browse_with(&request, &cancel)
    })
    .await;
    state.finish_browse(request_id.as_deref());
    Ok(Json(result?))
}

async fn restore(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(body): Json<BrowseBody>,
) -> Result<Json<RestoreReport>, AppError> {
    let name = body
        .name
        .clone()
        .unwrap_or_else(|| format!("{entity_id}-{}", Utc::now().format("%Y%m%d%H%M%S")));
    if !valid_name(&name) {
        return Err(AppError::BadRequest(format!("invalid restore name '{name}'")));
    }
    let target = state.config.restores_dir.join(&name);
    if target.exists() {
        return Err(AppError::Conflict(format!("restore '{name}' already exists")));
    }

    let request = body.to_request(&entity_id);
    let request_id = body.request_id;
    let cancel = state.track_browse(request_id.as_deref());

    let result = blocking(&state, move |engine| {
        engine.resolver().restore(&request, &target, &cancel)
    })
    .await;
    state.finish_browse(request_id.as_deref());
    Ok(Json(result?))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.cancel_browse(&request_id) {
        tracing::info!(request_id = %request_id, "Browse cancelled");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("no browse in flight with id {request_id}")))
    }
}
