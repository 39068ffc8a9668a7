pub mod browse;
pub mod checkpoints;
pub mod entities;
pub mod health;
pub mod jobs;
pub mod maintenance;
pub mod settings;

use crate::error::AppError;
use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use catalog_core::CatalogEngine;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(entities::router())
        .merge(jobs::router())
        .merge(checkpoints::router())
        .merge(maintenance::router())
        .merge(browse::router())
        .nest("/api/settings", settings::router())
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a blocking engine call off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&CatalogEngine) -> catalog_core::Result<T> + Send + 'static,
{
    let engine = state.engine.clone();
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        let config = AppConfig::for_data_dir(dir);
        let engine = Arc::new(CatalogEngine::open(config.engine.clone()).unwrap());
        create_router(Arc::new(AppState::new(engine, config)))
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_entity_and_job_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/entities",
                r#"{"id":"sc","backupset_id":"bs","retention_cycles":2}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/entities/sc/jobs",
                r#"{"level":"incremental","start_time":"2024-01-01T00:00:00Z"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let job: serde_json::Value = serde_json::from_slice(&body).unwrap();
        // No completed full yet
        assert_eq!(job["level"], "full");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/entities/sc/jobs",
                r#"{"level":"full"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(json_request("POST", "/api/entities/nope/browse", r#"{"job_id":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
