use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use catalog_core::{CatalogItem, Job, JobLevel, JobOutcome};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/entities/{id}/jobs", get(list_jobs).post(start_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/items", post(append_items))
        .route("/api/jobs/{id}/finish", post(finish_job))
        .route("/api/jobs/{id}/checkpoint", post(run_checkpoint_phase))
        .route("/api/jobs/{id}/suspend", post(suspend_job))
        .route("/api/jobs/{id}/resume", post(resume_job))
        .route("/api/jobs/{id}/fail", post(fail_job))
}

#[derive(Deserialize)]
pub struct StartJobRequest {
    pub level: JobLevel,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct AppendItemsRequest {
    pub items: Vec<CatalogItem>,
}

#[derive(Deserialize, Default)]
pub struct FinishJobRequest {
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Default)]
pub struct FailJobRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<Vec<Job>>, AppError> {
    let jobs = blocking(&state, move |engine| {
        engine.entity(&entity_id)?;
        engine.jobs(&entity_id)
    })
    .await?;
    Ok(Json(jobs))
}

async fn start_job(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(body): Json<StartJobRequest>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let start_time = body.start_time.unwrap_or_else(Utc::now);
    let job = blocking(&state, move |engine| {
        engine.start_job(&entity_id, body.level, start_time)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Job>, AppError> {
    Ok(Json(blocking(&state, move |engine| engine.job(id)).await?))
}

async fn append_items(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<AppendItemsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let received = body.items.len();
    let inserted = blocking(&state, move |engine| engine.append_items(id, &body.items)).await?;
    Ok(Json(json!({ "job_id": id, "received": received, "inserted": inserted })))
}

async fn finish_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<FinishJobRequest>>,
) -> Result<Json<JobOutcome>, AppError> {
    let end_time = body.and_then(|Json(b)| b.end_time).unwrap_or_else(Utc::now);
    Ok(Json(
        blocking(&state, move |engine| engine.finish_job(id, end_time)).await?,
    ))
}

async fn run_checkpoint_phase(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<JobOutcome>, AppError> {
    Ok(Json(
        blocking(&state, move |engine| engine.run_checkpoint_phase(id)).await?,
    ))
}

async fn suspend_job(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Job>, AppError> {
    Ok(Json(blocking(&state, move |engine| engine.suspend_job(id)).await?))
}

async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<JobOutcome>, AppError> {
    Ok(Json(blocking(&state, move |engine| engine.resume_job(id)).await?))
}

async fn fail_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<FailJobRequest>>,
) -> Result<Json<Job>, AppError> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "reported failed".to_string());
    Ok(Json(
        blocking(&state, move |engine| engine.fail_job(id, &reason)).await?,
    ))
}
