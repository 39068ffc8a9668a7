use crate::config::AppConfig;
use catalog_core::CatalogEngine;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub engine: Arc<CatalogEngine>,
    pub config: AppConfig,
    /// In-flight browse/restore requests by client-supplied request id
    pub browse_requests: DashMap<String, CancellationToken>,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Arc<CatalogEngine>, config: AppConfig) -> Self {
        Self {
            engine,
            config,
            browse_requests: DashMap::new(),
            started_at: std::time::Instant::now(),
        }
    }

    /// Register a cancellable browse; without a request id the token is
    /// private to the caller.
    pub fn track_browse(&self, request_id: Option<&str>) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(id) = request_id {
            self.browse_requests.insert(id.to_string(), token.clone());
        }
        token
    }

    pub fn finish_browse(&self, request_id: Option<&str>) {
        if let Some(id) = request_id {
            self.browse_requests.remove(id);
        }
    }

    pub fn cancel_browse(&self, request_id: &str) -> bool {
        match self.browse_requests.remove(request_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
