use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use catalog_core::models::entity::{CreateEntityRequest, UpdateEntityRequest};
use catalog_core::{BackupEntity, CatalogDatabaseRecord, Cycle};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/entities", get(list_entities).post(create_entity))
        .route("/api/entities/{id}", get(get_entity).patch(update_entity))
        .route("/api/entities/{id}/cycles", get(list_cycles))
        .route("/api/entities/{id}/databases", get(list_databases))
}

async fn list_entities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BackupEntity>>, AppError> {
    Ok(Json(blocking(&state, |engine| engine.entities()).await?))
}

async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BackupEntity>, AppError> {
    Ok(Json(blocking(&state, move |engine| engine.entity(&id)).await?))
}

async fn create_entity(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<BackupEntity>), AppError> {
    if body.backupset_id.is_empty() {
        return Err(AppError::BadRequest("backupset_id is required".into()));
    }
    let entity = blocking(&state, move |engine| engine.create_entity(&body)).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

async fn update_entity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateEntityRequest>,
) -> Result<Json<BackupEntity>, AppError> {
    Ok(Json(
        blocking(&state, move |engine| engine.update_entity(&id, &body)).await?,
    ))
}

async fn list_cycles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Cycle>>, AppError> {
    let cycles = blocking(&state, move |engine| {
        engine.entity(&id)?;
        engine.cycles(&id)
    })
    .await?;
    Ok(Json(cycles))
}

async fn list_databases(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CatalogDatabaseRecord>>, AppError> {
    let databases = blocking(&state, move |engine| {
        engine.entity(&id)?;
        engine.databases(&id)
    })
    .await?;
    Ok(Json(databases))
}
