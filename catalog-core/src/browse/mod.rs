//! Cross-cycle browse resolver.
//!
//! Resolves a browse request to the smallest set of catalog sources that
//! together answer for every relevant job: the live main database first,
//! then the most recent valid checkpoint covering what is left, and finally
//! a synthesized temp database for jobs nothing else covers.

pub mod session;
pub mod synth;

use crate::catalog::ItemRecord;
use crate::cycle::{build_cycles, cycle_of, Cycle};
use crate::engine::{poisoned, CatalogEngine};
use crate::models::catalog_db::{self, CatalogDatabaseRecord};
use crate::models::checkpoint::{self, Checkpoint};
use crate::models::job::{self, Job};
use crate::utils::errors::{CatalogError, Result};
use crate::utils::retry::retry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use session::{BrowseSession, RestoreReport, RESTORE_MANIFEST};
pub use synth::{temp_database_name, Synthesizer, TempDatabase};

/// Either a job id, or a time range (one bound may be left open).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowseRequest {
    pub entity_id: String,
    #[serde(default)]
    pub job_id: Option<i64>,
    #[serde(default)]
    pub from_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub show_deleted: bool,
}

impl BrowseRequest {
    pub fn for_job(entity_id: &str, job_id: i64) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            job_id: Some(job_id),
            ..Default::default()
        }
    }

    pub fn for_range(entity_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            from_time: Some(from),
            to_time: Some(to),
            ..Default::default()
        }
    }

    pub fn show_deleted(mut self, show: bool) -> Self {
        self.show_deleted = show;
        self
    }

    fn describe(&self) -> String {
        match (self.job_id, self.from_time, self.to_time) {
            (Some(job_id), _, _) => format!("job {job_id}"),
            (None, from, to) => format!(
                "{}..{}",
                from.map(|t| t.to_rfc3339()).unwrap_or_default(),
                to.map(|t| t.to_rfc3339()).unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedSource {
    MainDatabase {
        database_guid: String,
        job_ids: Vec<i64>,
    },
    Checkpoint {
        checkpoint_id: i64,
        backing_object_id: String,
        database_guid: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        job_ids: Vec<i64>,
    },
    TempDatabase {
        name: String,
        job_ids: Vec<i64>,
    },
}

impl ResolvedSource {
    pub fn job_ids(&self) -> &[i64] {
        match self {
            ResolvedSource::MainDatabase { job_ids, .. }
            | ResolvedSource::Checkpoint { job_ids, .. }
            | ResolvedSource::TempDatabase { job_ids, .. } => job_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowseResult {
    pub entries: Vec<ItemRecord>,
    pub sources: Vec<ResolvedSource>,
    pub temp_databases: Vec<String>,
}

#[derive(Debug)]
enum PlanStep {
    Main {
        database: CatalogDatabaseRecord,
        jobs: Vec<Job>,
    },
    Checkpoint {
        checkpoint: Checkpoint,
        jobs: Vec<Job>,
    },
}

#[derive(Debug, Default)]
struct SourcePlan {
    steps: Vec<PlanStep>,
    /// Oldest first
    uncovered: Vec<Job>,
}

pub struct Resolver<'a> {
    engine: &'a CatalogEngine,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(engine: &'a CatalogEngine) -> Self {
        Self { engine }
    }

    pub fn browse(&self, request: &BrowseRequest) -> Result<BrowseResult> {
        self.browse_with(request, &CancellationToken::new())
    }

    pub fn browse_with(&self, request: &BrowseRequest, cancel: &CancellationToken) -> Result<BrowseResult> {
        self.with_session(request, cancel, |session| Ok(session.into_result()))
    }

    /// Resolve, then write every resolved database and a manifest into
    /// `target`. The copy runs under the same shared lock as the resolution,
    /// so a prune cannot change the main database in between.
    pub fn restore(&self, request: &BrowseRequest, target: &Path, cancel: &CancellationToken) -> Result<RestoreReport> {
        self.with_session(request, cancel, |session| session.materialize(target, cancel))
    }

    /// Select sources and gather their records. The records stay valid after
    /// the entity lock is released; the live main database does not.
    pub fn open_session(&self, request: &BrowseRequest, cancel: &CancellationToken) -> Result<BrowseSession> {
        self.with_session(request, cancel, Ok)
    }

    /// Resolve `request` and hand the session to `f` while the entity's
    /// shared lock is still held.
    pub(crate) fn with_session<T, F>(&self, request: &BrowseRequest, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(BrowseSession) -> Result<T>,
    {
        let range = request.describe();
        let entity = self.engine.entity(&request.entity_id)?;
        let mut session = BrowseSession::create(
            &self.engine.config.sessions_root(),
            &entity.id,
            request.show_deleted,
        )?;

        let lock = self.engine.entity_lock(&entity.id);
        let _shared = lock.read().map_err(|_| poisoned(&entity.id))?;
        self.resolve(request, &entity.id, &range, cancel, &mut session)?;

        info!(
            entity_id = %entity.id,
            range = %range,
            session = %session.id(),
            sources = session.sources().len(),
            "Browse resolved"
        );
        f(session)
    }

    fn resolve(
        &self,
        request: &BrowseRequest,
        entity_id: &str,
        range: &str,
        cancel: &CancellationToken,
        session: &mut BrowseSession,
    ) -> Result<()> {
        let attempts = self.engine.config.checkpoint.max_attempts;
        let plan = {
            let conn = self.engine.conn()?;
            let cycles = build_cycles(&job::find_by_entity(&conn, entity_id)?);
            let relevant = select_jobs(request, &cycles, entity_id, range)?;
            let main = catalog_db::find_main(&conn, entity_id)?;
            let checkpoints = checkpoint::find_valid_by_entity(&conn, entity_id)?;
            plan_sources(&relevant, main.as_ref(), &checkpoints)
        };
        debug!(
            entity_id = %entity_id,
            range = %range,
            steps = plan.steps.len(),
            uncovered = plan.uncovered.len(),
            "Browse plan"
        );
        check_cancelled(cancel)?;

        let mut last_resolved: Option<String> = None;
        for step in &plan.steps {
            match step {
                PlanStep::Main { database, jobs } => {
                    session
                        .attach_main(&database.guid, Path::new(&database.path), jobs)
                        .map_err(|e| resolution_error(entity_id, range, &last_resolved, e))?;
                    last_resolved = Some(database.guid.clone());
                }
                PlanStep::Checkpoint { checkpoint, jobs } => {
                    let file = session.dir().join(format!("checkpoint-{}.db", checkpoint.id));
                    retry("checkpoint restore", attempts, |_| {
                        self.engine
                            .archive
                            .restore_to(&checkpoint.backing_object_id, &file)
                    })
                    .map_err(|e| resolution_error(entity_id, range, &last_resolved, e.last))?;
                    session
                        .attach_checkpoint(checkpoint, file, jobs)
                        .map_err(|e| resolution_error(entity_id, range, &last_resolved, e))?;
                    last_resolved = Some(checkpoint.backing_object_id.clone());
                }
            }
            check_cancelled(cancel)?;
        }

        if !plan.uncovered.is_empty() {
            let dir = session.dir().to_path_buf();
            let temp = retry("temp database synthesis", attempts, |_| {
                self.engine.synthesizer().synthesize(entity_id, &plan.uncovered, &dir)
            })
            .map_err(|e| resolution_error(entity_id, range, &last_resolved, e.last))?;
            session
                .attach_temp(temp)
                .map_err(|e| resolution_error(entity_id, range, &last_resolved, e))?;
            check_cancelled(cancel)?;
        }
        Ok(())
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(CatalogError::Cancelled)
    } else {
        Ok(())
    }
}

/// Wrap a failed sub-step with the request's context. Outcomes that already
/// say what went wrong pass through untouched.
fn resolution_error(
    entity_id: &str,
    range: &str,
    last_resolved: &Option<String>,
    source: CatalogError,
) -> CatalogError {
    match source {
        e @ (CatalogError::SynthesisMismatch { .. }
        | CatalogError::Cancelled
        | CatalogError::ResolutionNotFound { .. }) => e,
        other => CatalogError::Resolution {
            entity_id: entity_id.to_string(),
            range: range.to_string(),
            last_resolved: last_resolved.clone(),
            source: Box::new(other),
        },
    }
}

/// Jobs a request needs, in cycle order.
///
/// A job id selects its cycle from the opening job through that job. A
/// range selects every completed job of the intersecting cycles that ended
/// by the range's upper bound.
fn select_jobs(request: &BrowseRequest, cycles: &[Cycle], entity_id: &str, range: &str) -> Result<Vec<Job>> {
    let not_found = || CatalogError::ResolutionNotFound {
        entity_id: entity_id.to_string(),
        range: range.to_string(),
    };

    match (request.job_id, request.from_time, request.to_time) {
        (Some(job_id), None, None) => {
            let cycle = cycle_of(cycles, job_id).ok_or_else(not_found)?;
            let last = cycle
                .jobs
                .iter()
                .position(|j| j.id == job_id)
                .ok_or_else(not_found)?;
            Ok(cycle.jobs[..=last].to_vec())
        }
        (Some(_), _, _) => Err(CatalogError::InvalidInput(
            "a browse takes either a job id or a time range, not both".into(),
        )),
        (None, None, None) => Err(CatalogError::InvalidInput(
            "a browse needs a job id or a time range".into(),
        )),
        (None, from, to) => {
            let from = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let to = to.unwrap_or_else(Utc::now);
            if from > to {
                return Err(CatalogError::InvalidInput(format!(
                    "range start {from} is after its end {to}"
                )));
            }
            let jobs: Vec<Job> = cycles
                .iter()
                .filter(|c| c.intersects(from, to))
                .flat_map(|c| c.jobs.iter().filter(|j| j.effective_end() <= to))
                .cloned()
                .collect();
            if jobs.is_empty() {
                return Err(not_found());
            }
            Ok(jobs)
        }
    }
}

/// Walk the relevant jobs from the most recent down. The main database
/// answers for all of its jobs; otherwise the most recent valid checkpoint
/// covering the job answers for every remaining job it covers; jobs nothing
/// covers are left for synthesis.
fn plan_sources(relevant: &[Job], main: Option<&CatalogDatabaseRecord>, checkpoints: &[Checkpoint]) -> SourcePlan {
    let mut remaining: Vec<Job> = relevant.to_vec();
    let mut plan = SourcePlan::default();

    while let Some(latest) = remaining.last().cloned() {
        if let Some(main) = main.filter(|m| m.guid == latest.database_guid) {
            let (jobs, rest): (Vec<Job>, Vec<Job>) =
                remaining.into_iter().partition(|j| j.database_guid == main.guid);
            plan.steps.push(PlanStep::Main {
                database: main.clone(),
                jobs,
            });
            remaining = rest;
            continue;
        }

        let best = checkpoints
            .iter()
            .filter(|cp| cp.is_valid() && cp.covers(&latest))
            .max_by_key(|cp| cp.id);
        match best {
            Some(cp) => {
                let (jobs, rest): (Vec<Job>, Vec<Job>) =
                    remaining.into_iter().partition(|j| cp.covers(j));
                plan.steps.push(PlanStep::Checkpoint {
                    checkpoint: cp.clone(),
                    jobs,
                });
                remaining = rest;
            }
            None => {
                remaining.pop();
                plan.uncovered.push(latest);
            }
        }
    }

    plan.uncovered.reverse();
    plan
}
