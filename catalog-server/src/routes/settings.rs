use crate::error::AppError;
use crate::routes::blocking;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/inline-checkpointing",
        get(get_inline_checkpointing).put(set_inline_checkpointing),
    )
}

#[derive(Serialize, Deserialize)]
pub struct InlineCheckpointing {
    pub enabled: bool,
}

async fn get_inline_checkpointing(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InlineCheckpointing>, AppError> {
    let enabled = blocking(&state, |engine| engine.inline_checkpointing()).await?;
    Ok(Json(InlineCheckpointing { enabled }))
}

async fn set_inline_checkpointing(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InlineCheckpointing>,
) -> Result<Json<InlineCheckpointing>, AppError> {
    let enabled = body.enabled;
    blocking(&state, move |engine| engine.set_inline_checkpointing(enabled)).await?;
    Ok(Json(InlineCheckpointing { enabled }))
}
