use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use catalog_core::Checkpoint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/entities/{id}/checkpoint", post(create_checkpoint))
        .route("/api/entities/{id}/checkpoints", get(list_checkpoints))
        .route("/api/databases/{guid}/checkpoints", get(list_database_checkpoints))
        .route("/api/checkpoints/{id}", get(get_checkpoint))
        .route("/api/checkpoints/{id}/invalidate", post(invalidate_checkpoint))
}

#[derive(Deserialize)]
pub struct CheckpointQuery {
    #[serde(default)]
    pub by_all_clients: bool,
}

#[derive(Serialize)]
pub struct CheckpointResponse {
    /// Absent when nothing new was captured since the last checkpoint
    pub checkpoint: Option<Checkpoint>,
}

async fn create_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Query(query): Query<CheckpointQuery>,
) -> Result<Json<CheckpointResponse>, AppError> {
    let checkpoint = blocking(&state, move |engine| {
        engine.checkpoints().checkpoint(&entity_id, query.by_all_clients)
    })
    .await?;
    Ok(Json(CheckpointResponse { checkpoint }))
}

async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<Vec<Checkpoint>>, AppError> {
    let checkpoints = blocking(&state, move |engine| {
        engine.entity(&entity_id)?;
        engine.checkpoints().list(&entity_id)
    })
    .await?;
    Ok(Json(checkpoints))
}

async fn list_database_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
) -> Result<Json<Vec<Checkpoint>>, AppError> {
    Ok(Json(
        blocking(&state, move |engine| engine.checkpoints().list_for_database(&guid)).await?,
    ))
}

async fn get_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Checkpoint>, AppError> {
    Ok(Json(blocking(&state, move |engine| engine.checkpoints().get(id)).await?))
}

async fn invalidate_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Checkpoint>, AppError> {
    Ok(Json(
        blocking(&state, move |engine| engine.checkpoints().invalidate(id)).await?,
    ))
}
