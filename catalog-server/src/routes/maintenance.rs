use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use catalog_core::{AgingReport, CompactionReport, PruneReport};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/entities/{id}/prune", post(prune))
        .route("/api/entities/{id}/compact", post(compact))
        .route("/api/maintenance/data-aging", post(data_aging))
}

async fn prune(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<PruneReport>, AppError> {
    Ok(Json(
        blocking(&state, move |engine| engine.pruner().prune(&entity_id)).await?,
    ))
}

async fn compact(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<CompactionReport>, AppError> {
    Ok(Json(blocking(&state, move |engine| engine.compact(&entity_id)).await?))
}

/// Same pass the data-aging schedule runs.
async fn data_aging(State(state): State<Arc<AppState>>) -> Result<Json<AgingReport>, AppError> {
    Ok(Json(blocking(&state, |engine| engine.pruner().prune_all()).await?))
}
