use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalog_core::CatalogError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let msg = err.to_string();
        match err {
            CatalogError::NotFound(_)
            | CatalogError::ResolutionNotFound { .. }
            | CatalogError::ObjectNotFound(_) => AppError::NotFound(msg),
            CatalogError::InvalidInput(_) | CatalogError::Config(_) => AppError::BadRequest(msg),
            CatalogError::WriterBusy(_) | CatalogError::InvalidState(_) | CatalogError::Cancelled => {
                AppError::Conflict(msg)
            }
            CatalogError::SynthesisMismatch { .. } => AppError::Unprocessable(msg),
            CatalogError::PruneFailure { .. } | CatalogError::CompactionFailure { .. } => {
                AppError::ServiceUnavailable(msg)
            }
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(anyhow::anyhow!(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::ServiceUnavailable(m) => {
                tracing::error!("Maintenance failure: {m}");
                (StatusCode::SERVICE_UNAVAILABLE, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: CatalogError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_catalog_errors_map_to_status_codes() {
        assert_eq!(
            status(CatalogError::ResolutionNotFound {
                entity_id: "sc".into(),
                range: "job 1".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(CatalogError::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(CatalogError::WriterBusy("sc".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(CatalogError::SynthesisMismatch {
                name: "t".into(),
                expected: vec![1],
                actual: vec![]
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(CatalogError::PruneFailure {
                entity_id: "sc".into(),
                reason: "disk".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(CatalogError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
