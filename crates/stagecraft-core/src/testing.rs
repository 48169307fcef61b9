//! In-memory repository implementations shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use stagecraft_types::checkpoint::{Checkpoint, CheckpointMeta};
use stagecraft_types::error::RepositoryError;
use stagecraft_types::job::{Job, JobStatus, StepExecution, StepExecutionStatus};
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::job::JobRepository;

// ---------------------------------------------------------------------------
// MemoryJobRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MemoryJobRepository {
    jobs: DashMap<Uuid, Job>,
    steps: Mutex<Vec<StepExecution>>,
}

impl MemoryJobRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for MemoryJobRepository {
    async fn create_job(&self, job: &Job) -> Result<(), RepositoryError> {
        if self.jobs.contains_key(&job.id) {
            return Err(RepositoryError::Conflict(format!(
                "job {} already exists",
                job.id
            )));
        }
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        if !self.jobs.contains_key(&job.id) {
            return Err(RepositoryError::NotFound);
        }
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.clone())
            .collect())
    }

    async fn list_finished(&self) -> Result<Vec<Job>, RepositoryError> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal() && j.status != JobStatus::Archived)
            .map(|j| j.clone())
            .collect())
    }

    async fn create_step(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.steps
            .lock()
            .expect("step log lock poisoned")
            .push(step.clone());
        Ok(())
    }

    async fn update_step(
        &self,
        exec_id: &Uuid,
        status: StepExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut steps = self.steps.lock().expect("step log lock poisoned");
        let step = steps
            .iter_mut()
            .find(|s| s.id == *exec_id)
            .ok_or(RepositoryError::NotFound)?;
        step.status = status;
        step.output = output.cloned();
        step.error = error.map(String::from);
        step.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn list_steps(&self, job_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .lock()
            .expect("step log lock poisoned")
            .iter()
            .filter(|s| s.job_id == *job_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| (s.started_at, s.id));
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MemoryCheckpointRepository {
    checkpoints: Mutex<Vec<Checkpoint>>,
    fail_inserts: AtomicBool,
}

impl MemoryCheckpointRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail, to exercise persistence-failure
    /// handling in the engine.
    pub(crate) fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

impl CheckpointRepository for MemoryCheckpointRepository {
    async fn insert(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query(
                "simulated checkpoint write failure".to_string(),
            ));
        }
        let mut checkpoints = self.checkpoints.lock().expect("checkpoint lock poisoned");
        if checkpoints
            .iter()
            .any(|c| c.id == checkpoint.id && c.job_id == checkpoint.job_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "checkpoint {} already exists",
                checkpoint.id
            )));
        }
        checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn get(
        &self,
        job_id: &Uuid,
        checkpoint_id: &Uuid,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self
            .checkpoints
            .lock()
            .expect("checkpoint lock poisoned")
            .iter()
            .find(|c| c.job_id == *job_id && c.id == *checkpoint_id)
            .cloned())
    }

    async fn list(&self, job_id: &Uuid) -> Result<Vec<CheckpointMeta>, RepositoryError> {
        let mut metas: Vec<CheckpointMeta> = self
            .checkpoints
            .lock()
            .expect("checkpoint lock poisoned")
            .iter()
            .filter(|c| c.job_id == *job_id)
            .map(|c| c.meta())
            .collect();
        metas.sort_by_key(|m| (m.created_at, m.id));
        Ok(metas)
    }

    async fn latest(&self, job_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let checkpoints = self.checkpoints.lock().expect("checkpoint lock poisoned");
        Ok(checkpoints
            .iter()
            .filter(|c| c.job_id == *job_id)
            .max_by_key(|c| (c.created_at, c.id))
            .cloned())
    }

    async fn delete(
        &self,
        job_id: &Uuid,
        checkpoint_id: &Uuid,
    ) -> Result<bool, RepositoryError> {
        let mut checkpoints = self.checkpoints.lock().expect("checkpoint lock poisoned");
        let before = checkpoints.len();
        checkpoints.retain(|c| !(c.job_id == *job_id && c.id == *checkpoint_id));
        Ok(checkpoints.len() < before)
    }

    async fn purge(&self, job_id: &Uuid) -> Result<u64, RepositoryError> {
        let mut checkpoints = self.checkpoints.lock().expect("checkpoint lock poisoned");
        let before = checkpoints.len();
        checkpoints.retain(|c| c.job_id != *job_id);
        Ok((before - checkpoints.len()) as u64)
    }
}
