//! Cycle tracker.
//!
//! A cycle is a Full or SyntheticFull job plus every following Incremental or
//! Differential job up to, not including, the next Full/SyntheticFull. Only
//! completed jobs take part; failed and aged jobs are skipped.

use crate::models::job::{Job, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct Cycle {
    /// 1-based position among the entity's cycles, oldest first
    pub number: usize,
    pub jobs: Vec<Job>,
}

impl Cycle {
    pub fn opening_job(&self) -> &Job {
        &self.jobs[0]
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.opening_job().start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.jobs
            .iter()
            .map(Job::effective_end)
            .max()
            .unwrap_or_else(|| self.start_time())
    }

    pub fn job_ids(&self) -> Vec<i64> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    pub fn contains_job(&self, job_id: i64) -> bool {
        self.jobs.iter().any(|j| j.id == job_id)
    }

    pub fn intersects(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start_time() <= to && self.end_time() >= from
    }
}

/// Group an entity's jobs into cycles, oldest first.
pub fn build_cycles(jobs: &[Job]) -> Vec<Cycle> {
    let mut completed: Vec<&Job> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .collect();
    completed.sort_by_key(|j| (j.start_time, j.id));

    let mut cycles: Vec<Cycle> = Vec::new();
    for job in completed {
        if job.level.opens_cycle() {
            cycles.push(Cycle {
                number: cycles.len() + 1,
                jobs: vec![job.clone()],
            });
        } else if let Some(current) = cycles.last_mut() {
            current.jobs.push(job.clone());
        } else {
            warn!(job_id = job.id, level = %job.level, "Job precedes any full backup, not part of a cycle");
        }
    }
    cycles
}

pub fn cycle_of(cycles: &[Cycle], job_id: i64) -> Option<&Cycle> {
    cycles.iter().find(|c| c.contains_job(job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::from_timestamp;
    use crate::models::job::{CheckpointState, JobLevel};

    fn job(id: i64, level: JobLevel, start: i64, status: JobStatus) -> Job {
        Job {
            id,
            entity_id: "sc".into(),
            database_guid: "g".into(),
            level,
            status,
            checkpoint_state: CheckpointState::NotApplicable,
            resume_state: None,
            start_time: from_timestamp(start),
            end_time: Some(from_timestamp(start + 10)),
            metadata_object: None,
            checkpoint_error: None,
        }
    }

    #[test]
    fn test_groups_jobs_by_full() {
        let jobs = vec![
            job(4, JobLevel::SyntheticFull, 400, JobStatus::Completed),
            job(1, JobLevel::Full, 100, JobStatus::Completed),
            job(2, JobLevel::Incremental, 200, JobStatus::Completed),
            job(3, JobLevel::Differential, 300, JobStatus::Completed),
            job(5, JobLevel::Incremental, 500, JobStatus::Completed),
        ];
        let cycles = build_cycles(&jobs);

        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].job_ids(), vec![1, 2, 3]);
        assert_eq!(cycles[1].job_ids(), vec![4, 5]);
        assert_eq!(cycles[1].number, 2);
        assert_eq!(cycles[0].end_time(), from_timestamp(310));
        assert_eq!(cycle_of(&cycles, 5).map(|c| c.number), Some(2));
    }

    #[test]
    fn test_skips_failed_aged_and_orphans() {
        let jobs = vec![
            job(1, JobLevel::Incremental, 50, JobStatus::Completed),
            job(2, JobLevel::Full, 100, JobStatus::Failed),
            job(3, JobLevel::Full, 200, JobStatus::Aged),
            job(4, JobLevel::Full, 300, JobStatus::Completed),
            job(5, JobLevel::Incremental, 400, JobStatus::Running),
        ];
        let cycles = build_cycles(&jobs);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].job_ids(), vec![4]);
    }

    #[test]
    fn test_intersects() {
        let cycles = build_cycles(&[
            job(1, JobLevel::Full, 100, JobStatus::Completed),
            job(2, JobLevel::Incremental, 200, JobStatus::Completed),
        ]);
        let c = &cycles[0];
        assert!(c.intersects(from_timestamp(0), from_timestamp(100)));
        assert!(c.intersects(from_timestamp(210), from_timestamp(500)));
        assert!(!c.intersects(from_timestamp(211), from_timestamp(500)));
        assert!(!c.intersects(from_timestamp(0), from_timestamp(99)));
    }
}
