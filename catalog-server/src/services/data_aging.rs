use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Periodic data aging: prunes every entity on the configured cron schedule.
pub struct DataAgingScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl DataAgingScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                run_data_aging(state).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Data aging scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// One data aging pass. Failures are logged; a failing entity never stops
/// the others.
pub async fn run_data_aging(state: Arc<AppState>) {
    tracing::info!("Data aging started");
    let engine = state.engine.clone();
    match tokio::task::spawn_blocking(move || engine.pruner().prune_all()).await {
        Ok(Ok(report)) => tracing::info!(
            entities = report.reports.len(),
            failures = report.failures.len(),
            jobs_aged = report.reports.iter().map(|r| r.jobs_aged.len()).sum::<usize>(),
            "Data aging finished"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Data aging failed"),
        Err(e) => tracing::error!(error = %e, "Data aging task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use catalog_core::models::entity::CreateEntityRequest;
    use catalog_core::{CatalogEngine, CatalogItem, IndexStrategy, JobLevel};
    use chrono::DateTime;

    #[tokio::test]
    async fn test_data_aging_prunes_every_entity() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_data_dir(dir.path());
        let engine = Arc::new(CatalogEngine::open(config.engine.clone()).unwrap());

        engine
            .create_entity(&CreateEntityRequest {
                id: "sc".into(),
                backupset_id: "bs".into(),
                retention_cycles: Some(1),
                index_strategy: IndexStrategy::Reuse,
            })
            .unwrap();
        for start in [100, 200, 300] {
            let job = engine
                .start_job("sc", JobLevel::Full, DateTime::from_timestamp(start, 0).unwrap())
                .unwrap();
            engine
                .append_items(
                    job.id,
                    &[CatalogItem {
                        path: format!("/f{start}"),
                        size: 1,
                        mtime: start,
                        deleted: false,
                        checksum: None,
                    }],
                )
                .unwrap();
            engine
                .finish_job(job.id, DateTime::from_timestamp(start + 10, 0).unwrap())
                .unwrap();
        }

        let state = Arc::new(AppState::new(engine.clone(), config));
        run_data_aging(state).await;

        assert_eq!(engine.cycles("sc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_cron() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_data_dir(dir.path());
        let engine = Arc::new(CatalogEngine::open(config.engine.clone()).unwrap());
        let scheduler = DataAgingScheduler::new(Arc::new(AppState::new(engine, config)))
            .await
            .unwrap();
        assert!(scheduler.schedule("not a cron").await.is_err());
    }
}
