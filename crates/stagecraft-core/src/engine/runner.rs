//! The job engine: queueing, dispatch, stage execution, and lifecycle.
//!
//! Jobs move through a bounded queue into a permit-limited running set.
//! Each running job executes its compiled plan one stage at a time; steps
//! within a stage run concurrently on a `tokio::JoinSet`, capped by a
//! per-stage semaphore. After every completed stage the engine checkpoints
//! the accumulated context, so pause, crash, and retry all resume from the
//! last completed stage instead of the beginning.
//!
//! # Job flow
//!
//! 1. `submit` compiles the workflow (rejecting invalid definitions
//!    synchronously), persists a `Pending` job, and enqueues it.
//! 2. `dispatch` drains the queue while permits are available, spawning one
//!    task per job.
//! 3. The job task restores progress from the latest checkpoint, then drives
//!    stages in plan order, retrying failed steps with exponential backoff.
//! 4. Every status transition is persisted before the engine moves on, and
//!    published as a `job.<status>` event.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use stagecraft_types::config::EngineConfig;
use stagecraft_types::error::RepositoryError;
use stagecraft_types::event::EngineEvent;
use stagecraft_types::job::{Job, JobFailure, JobStatus, StepExecution, StepExecutionStatus};
use stagecraft_types::plan::ExecutionPlan;
use stagecraft_types::workflow::{StepDefinition, WorkflowDefinition};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::compiler::{self, CompileError};
use crate::event::EventBus;
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::job::JobRepository;

use super::backoff::backoff_delay;
use super::context::{JobContext, StageSnapshot};
use super::step_executor::{BoxStepExecutor, ExecutorRegistry, StepExecutorError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default step-level timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow with this name in the catalog.
    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(String),

    /// No job with this ID.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// A step references an executor the registry cannot resolve.
    #[error("step '{step}' references unknown executor '{executor}'")]
    UnknownExecutor { step: String, executor: String },

    /// The running set and the queue are both full.
    #[error("capacity exceeded: {running} jobs running, {capacity} queued")]
    CapacityExceeded { running: usize, capacity: usize },

    /// The requested status change is not a state-machine edge.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// The job has no retry budget left.
    #[error("job {job_id} exhausted its retry budget ({limit})")]
    RetryLimitExceeded { job_id: Uuid, limit: u32 },

    /// Workflow compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Checkpoint store operation failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Job store operation failed.
    #[error("repository error: {0}")]
    Repository(String),
}

impl EngineError {
    fn from_repo(e: RepositoryError) -> Self {
        EngineError::Repository(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Stage outcome (internal)
// ---------------------------------------------------------------------------

/// How a pass over the stage loop ended.
enum StageOutcome {
    Completed,
    Paused,
    Cancelled,
    Failed(JobFailure),
    PersistenceFailure(String),
}

// ---------------------------------------------------------------------------
// JobEngine
// ---------------------------------------------------------------------------

/// Orchestrates job lifecycle over a compiled execution plan.
///
/// Generic over `R: JobRepository` and `C: CheckpointRepository` for storage
/// flexibility. All shared state is per-job (cancellation tokens, pause
/// flags) or bounded (queue, permits); unrelated jobs never contend.
pub struct JobEngine<R: JobRepository, C: CheckpointRepository> {
    repo: Arc<R>,
    checkpoints: Arc<CheckpointStore<C>>,
    executors: Arc<ExecutorRegistry>,
    event_bus: EventBus,
    config: EngineConfig,
    /// In-memory workflow catalog keyed by workflow name.
    workflows: DashMap<String, WorkflowDefinition>,
    /// Submissions waiting for a permit.
    queue: Mutex<VecDeque<Uuid>>,
    /// Bounds the running set at `max_concurrent_jobs`.
    job_permits: Arc<Semaphore>,
    /// Cancellation tokens keyed by job ID (present while running).
    cancel_tokens: DashMap<Uuid, CancellationToken>,
    /// Pause flags, honored at the next stage boundary.
    pause_requests: DashMap<Uuid, ()>,
}

impl<R: JobRepository + 'static, C: CheckpointRepository + 'static> JobEngine<R, C> {
    /// Create a new engine.
    pub fn new(
        repo: R,
        checkpoint_repo: C,
        executors: ExecutorRegistry,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo: Arc::new(repo),
            checkpoints: Arc::new(CheckpointStore::new(checkpoint_repo)),
            executors: Arc::new(executors),
            event_bus,
            job_permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            workflows: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            cancel_tokens: DashMap::new(),
            pause_requests: DashMap::new(),
        })
    }

    /// Access the job repository.
    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    /// Access the checkpoint store.
    pub fn checkpoints(&self) -> &CheckpointStore<C> {
        &self.checkpoints
    }

    /// Access the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// Add a workflow to the catalog.
    ///
    /// The definition is compiled (and its executor references resolved) so
    /// structural problems surface here rather than at run time.
    pub fn register_workflow(&self, def: WorkflowDefinition) -> Result<(), EngineError> {
        compiler::compile(&def)?;
        self.check_executors(&def)?;
        tracing::debug!(
            workflow = def.name.as_str(),
            steps = def.steps.len(),
            "registered workflow"
        );
        self.workflows.insert(def.name.clone(), def);
        Ok(())
    }

    /// Look up a registered workflow by name.
    pub fn workflow(&self, name: &str) -> Option<WorkflowDefinition> {
        self.workflows.get(name).map(|d| d.clone())
    }

    fn check_executors(&self, def: &WorkflowDefinition) -> Result<(), EngineError> {
        for step in &def.steps {
            if !self.executors.contains(&step.executor) {
                return Err(EngineError::UnknownExecutor {
                    step: step.id.clone(),
                    executor: step.executor.clone(),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Submission & dispatch
    // -----------------------------------------------------------------------

    /// Create a `Pending` job for a workflow and enqueue it.
    ///
    /// Compilation errors are surfaced here, synchronously, and prevent job
    /// creation. Rejects with `CapacityExceeded` only when the running set
    /// is full AND the queue is at its bound.
    pub async fn submit(
        self: &Arc<Self>,
        workflow_name: &str,
        params: Value,
    ) -> Result<Uuid, EngineError> {
        let def = self
            .workflows
            .get(workflow_name)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_string()))?;

        let plan = compiler::compile(&def)?;
        self.check_executors(&def)?;

        {
            let queue = self.queue.lock().expect("job queue lock poisoned");
            if self.job_permits.available_permits() == 0
                && queue.len() >= self.config.queue_capacity
            {
                return Err(EngineError::CapacityExceeded {
                    running: self.config.max_concurrent_jobs,
                    capacity: self.config.queue_capacity,
                });
            }
        }

        let job = Job::new(def.id, &def.name, params, plan.step_count() as u32);
        let job_id = job.id;
        self.repo
            .create_job(&job)
            .await
            .map_err(EngineError::from_repo)?;
        self.publish_status(&job);

        tracing::info!(job_id = %job_id, workflow = def.name.as_str(), "job submitted");

        self.queue
            .lock()
            .expect("job queue lock poisoned")
            .push_back(job_id);
        self.dispatch();
        Ok(job_id)
    }

    /// Drain the queue while permits are available, spawning one task per
    /// job. Never blocks on a job's steps: each job runs on its own task.
    pub fn dispatch(self: &Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.job_permits).try_acquire_owned() else {
                break;
            };
            let next = self
                .queue
                .lock()
                .expect("job queue lock poisoned")
                .pop_front();
            let Some(job_id) = next else {
                // Permit returns to the semaphore on drop
                break;
            };

            let engine = Arc::clone(self);
            tokio::spawn(async move {
                {
                    let _permit = permit;
                    if let Err(e) = engine.run_job(job_id).await {
                        tracing::error!(job_id = %job_id, error = %e, "job run aborted");
                    }
                }
                engine.dispatch();
            });
        }
    }

    // -----------------------------------------------------------------------
    // Job run
    // -----------------------------------------------------------------------

    async fn run_job(self: &Arc<Self>, job_id: Uuid) -> Result<(), EngineError> {
        let mut job = self.get_job(job_id).await?;

        // Cancelled (or otherwise finished) while still queued: nothing to do.
        if job.status.is_terminal() {
            return Ok(());
        }

        let def = self
            .workflows
            .get(&job.workflow_name)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::WorkflowNotFound(job.workflow_name.clone()))?;

        // Compiled once per job run; identical definitions yield identical plans.
        let plan = compiler::compile(&def)?;

        // Resolve every executor reference up front.
        let mut resolved: HashMap<String, Arc<BoxStepExecutor>> = HashMap::new();
        for step in &def.steps {
            let executor = self.executors.resolve(&step.executor).ok_or_else(|| {
                EngineError::UnknownExecutor {
                    step: step.id.clone(),
                    executor: step.executor.clone(),
                }
            })?;
            resolved.insert(step.executor.clone(), executor);
        }

        if job.status == JobStatus::Running {
            // Crash recovery re-enters a job that never left Running
            self.publish_status(&job);
        } else {
            self.transition(&mut job, JobStatus::Running).await?;
        }

        let token = CancellationToken::new();
        self.cancel_tokens.insert(job_id, token.clone());

        tracing::info!(
            job_id = %job_id,
            workflow = def.name.as_str(),
            "starting job execution"
        );

        let outcome = match self.restore_progress(&job).await {
            Ok((start_stage, mut ctx)) => {
                job.progress.completed_steps = ctx.completed_count() as u32;
                self.execute_stages(&mut job, &def, &plan, &resolved, start_stage, &mut ctx, &token)
                    .await
            }
            Err(e) => StageOutcome::PersistenceFailure(e.to_string()),
        };

        self.cancel_tokens.remove(&job_id);
        self.pause_requests.remove(&job_id);

        match outcome {
            StageOutcome::Completed => {
                self.transition(&mut job, JobStatus::Completed).await?;
                tracing::info!(job_id = %job_id, "job completed");
            }
            StageOutcome::Paused => {
                self.transition(&mut job, JobStatus::Paused).await?;
                tracing::info!(job_id = %job_id, "job paused");
            }
            StageOutcome::Cancelled => {
                self.transition(&mut job, JobStatus::Cancelled).await?;
                tracing::info!(job_id = %job_id, "job cancelled");
            }
            StageOutcome::Failed(failure) => {
                tracing::warn!(job_id = %job_id, error = %failure, "job failed");
                job.failure = Some(failure);
                self.transition(&mut job, JobStatus::Failed).await?;
            }
            StageOutcome::PersistenceFailure(message) => {
                tracing::error!(
                    job_id = %job_id,
                    error = message.as_str(),
                    "persistence failure, aborting job"
                );
                job.failure = Some(JobFailure {
                    step_id: format!("stage-{}", job.progress.current_stage),
                    attempts: 0,
                    message,
                });
                self.transition(&mut job, JobStatus::PersistenceFailure)
                    .await?;
            }
        }
        Ok(())
    }

    /// Recover the first incomplete stage and the context as of the latest
    /// checkpoint, or a fresh context when none exists.
    async fn restore_progress(
        &self,
        job: &Job,
    ) -> Result<(usize, JobContext), CheckpointError> {
        match self.checkpoints.latest(job.id).await? {
            Some(checkpoint) => match StageSnapshot::from_value(checkpoint.state) {
                Ok(snapshot) => {
                    tracing::debug!(
                        job_id = %job.id,
                        resume_stage = snapshot.stage + 1,
                        "resuming from checkpoint"
                    );
                    Ok((snapshot.stage + 1, snapshot.context))
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        error = %e,
                        "unreadable checkpoint state, restarting from the first stage"
                    );
                    Ok((0, JobContext::new(job.id, job.params.clone())))
                }
            },
            None => Ok((0, JobContext::new(job.id, job.params.clone()))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_stages(
        &self,
        job: &mut Job,
        def: &WorkflowDefinition,
        plan: &ExecutionPlan,
        resolved: &HashMap<String, Arc<BoxStepExecutor>>,
        start_stage: usize,
        ctx: &mut JobContext,
        token: &CancellationToken,
    ) -> StageOutcome {
        for (stage_idx, stage) in plan.stages.iter().enumerate().skip(start_stage) {
            if token.is_cancelled() {
                return StageOutcome::Cancelled;
            }
            if self.pause_requests.remove(&job.id).is_some() {
                tracing::info!(job_id = %job.id, stage = stage_idx, "pausing at stage boundary");
                return StageOutcome::Paused;
            }

            job.progress.current_stage = stage_idx as u32;
            tracing::debug!(
                job_id = %job.id,
                stage = stage_idx,
                steps = stage.steps.len(),
                "starting stage"
            );

            let step_permits =
                Arc::new(Semaphore::new(self.config.max_parallel_steps_per_stage));
            let mut join_set: JoinSet<Result<(String, Value), JobFailure>> = JoinSet::new();

            for step_id in &stage.steps {
                // Plan and definition always agree; missing entries would be
                // a compiler bug, reported as a job failure rather than a panic.
                let Some(step) = def.step(step_id) else {
                    return StageOutcome::Failed(JobFailure {
                        step_id: step_id.clone(),
                        attempts: 0,
                        message: "step missing from definition".to_string(),
                    });
                };
                let Some(executor) = resolved.get(step.executor.as_str()).cloned() else {
                    return StageOutcome::Failed(JobFailure {
                        step_id: step_id.clone(),
                        attempts: 0,
                        message: format!("executor '{}' not resolved", step.executor),
                    });
                };

                let max_attempts = step
                    .retry
                    .as_ref()
                    .map(|r| r.max_attempts)
                    .unwrap_or(self.config.max_retries)
                    .max(1);

                join_set.spawn(run_step(StepRunParams {
                    repo: Arc::clone(&self.repo),
                    event_bus: self.event_bus.clone(),
                    permits: Arc::clone(&step_permits),
                    step: step.clone(),
                    executor,
                    input: ctx.step_input(step),
                    job_id: job.id,
                    max_attempts,
                    base_delay: Duration::from_millis(self.config.retry_base_delay_ms),
                    max_delay: Duration::from_millis(self.config.retry_max_delay_ms),
                    token: token.clone(),
                }));
            }

            // Already-running siblings drain to completion even after a
            // failure; no further stage starts.
            let mut stage_failure: Option<JobFailure> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok((step_id, output))) => {
                        ctx.set_step_output(&step_id, output);
                        job.progress.completed_steps += 1;
                    }
                    Ok(Err(failure)) => {
                        if stage_failure.is_none() {
                            stage_failure = Some(failure);
                        }
                    }
                    Err(join_err) => {
                        if stage_failure.is_none() {
                            stage_failure = Some(JobFailure {
                                step_id: format!("stage-{stage_idx}"),
                                attempts: 0,
                                message: format!("task join error: {join_err}"),
                            });
                        }
                    }
                }
            }

            if token.is_cancelled() {
                return StageOutcome::Cancelled;
            }
            if let Some(failure) = stage_failure {
                return StageOutcome::Failed(failure);
            }

            // Checkpoint the completed stage before moving on. A failed
            // write aborts the job rather than proceeding with unrecorded
            // progress.
            let label = format!("stage-{stage_idx}");
            let snapshot = StageSnapshot {
                stage: stage_idx,
                context: ctx.clone(),
            };
            match self
                .checkpoints
                .save(job.id, &label, snapshot.to_value())
                .await
            {
                Ok(checkpoint_id) => {
                    self.event_bus.publish(EngineEvent::CheckpointSaved {
                        job_id: job.id,
                        checkpoint_id,
                        label,
                    });
                    if let Err(e) = self
                        .checkpoints
                        .cleanup(job.id, self.config.checkpoint_retention_count)
                        .await
                    {
                        tracing::warn!(job_id = %job.id, error = %e, "checkpoint cleanup failed");
                    }
                }
                Err(e) => return StageOutcome::PersistenceFailure(e.to_string()),
            }
            if let Err(e) = self.repo.update_job(job).await {
                return StageOutcome::PersistenceFailure(e.to_string());
            }
        }

        StageOutcome::Completed
    }

    // -----------------------------------------------------------------------
    // Control operations
    // -----------------------------------------------------------------------

    /// Request a pause. Takes effect at the next stage boundary; steps in
    /// flight are not interrupted.
    pub async fn pause(&self, job_id: Uuid) -> Result<(), EngineError> {
        let job = self.get_job(job_id).await?;
        if job.status != JobStatus::Running {
            return Err(EngineError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Paused,
            });
        }
        self.pause_requests.insert(job_id, ());
        tracing::info!(job_id = %job_id, "pause requested");
        Ok(())
    }

    /// Re-enter the scheduler loop at the first incomplete stage.
    pub async fn resume(self: &Arc<Self>, job_id: Uuid) -> Result<(), EngineError> {
        let job = self.get_job(job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(EngineError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Running,
            });
        }
        self.pause_requests.remove(&job_id);
        self.queue
            .lock()
            .expect("job queue lock poisoned")
            .push_back(job_id);
        self.dispatch();
        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// A running job propagates the signal into in-flight steps and is
    /// marked `Cancelled` once its stage drains; a queued or paused job is
    /// cancelled immediately.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), EngineError> {
        let mut job = self.get_job(job_id).await?;

        if let Some(token) = self.cancel_tokens.get(&job_id) {
            token.cancel();
            tracing::info!(job_id = %job_id, "cancellation requested");
            return Ok(());
        }

        self.queue
            .lock()
            .expect("job queue lock poisoned")
            .retain(|id| *id != job_id);
        self.pause_requests.remove(&job_id);
        self.transition(&mut job, JobStatus::Cancelled).await
    }

    /// Re-run a failed job from its last checkpoint, bounded by
    /// `max_retries` whole-job retries.
    pub async fn retry(self: &Arc<Self>, job_id: Uuid) -> Result<(), EngineError> {
        let mut job = self.get_job(job_id).await?;
        if job.retry_count >= self.config.max_retries {
            return Err(EngineError::RetryLimitExceeded {
                job_id,
                limit: self.config.max_retries,
            });
        }
        job.retry_count += 1;
        job.failure = None;
        self.transition(&mut job, JobStatus::Retrying).await?;
        self.queue
            .lock()
            .expect("job queue lock poisoned")
            .push_back(job_id);
        self.dispatch();
        Ok(())
    }

    /// Startup recovery: re-enqueue every job a previous process left
    /// runnable. Paused jobs stay paused until an explicit resume.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, EngineError> {
        let jobs = self
            .repo
            .list_unfinished()
            .await
            .map_err(EngineError::from_repo)?;

        let mut requeued = 0;
        for job in jobs {
            match job.status {
                JobStatus::Running | JobStatus::Pending | JobStatus::Retrying => {
                    tracing::info!(
                        job_id = %job.id,
                        status = %job.status,
                        "requeueing job after restart"
                    );
                    self.queue
                        .lock()
                        .expect("job queue lock poisoned")
                        .push_back(job.id);
                    requeued += 1;
                }
                _ => {}
            }
        }
        self.dispatch();
        Ok(requeued)
    }

    /// Retention sweep: move terminal jobs to `Archived` and purge their
    /// checkpoints.
    pub async fn archive_finished(&self) -> Result<usize, EngineError> {
        let jobs = self
            .repo
            .list_finished()
            .await
            .map_err(EngineError::from_repo)?;

        let mut archived = 0;
        for mut job in jobs {
            self.transition(&mut job, JobStatus::Archived).await?;
            if let Err(e) = self.checkpoints.purge(job.id).await {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "failed to purge checkpoints for archived job"
                );
            }
            archived += 1;
        }
        Ok(archived)
    }

    /// Fetch a job record.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, EngineError> {
        self.repo
            .get_job(&job_id)
            .await
            .map_err(EngineError::from_repo)?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Validate and persist a status change, then publish it. An invalid
    /// edge leaves the job untouched.
    async fn transition(&self, job: &mut Job, next: JobStatus) -> Result<(), EngineError> {
        if !job.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        job.updated_at = chrono::Utc::now();
        self.repo
            .update_job(job)
            .await
            .map_err(EngineError::from_repo)?;
        self.publish_status(job);
        Ok(())
    }

    fn publish_status(&self, job: &Job) {
        self.event_bus.publish(EngineEvent::JobStatusChanged {
            job_id: job.id,
            workflow_name: job.workflow_name.clone(),
            status: job.status,
        });
    }
}

// ---------------------------------------------------------------------------
// Step task
// ---------------------------------------------------------------------------

struct StepRunParams<R: JobRepository> {
    repo: Arc<R>,
    event_bus: EventBus,
    permits: Arc<Semaphore>,
    step: StepDefinition,
    executor: Arc<BoxStepExecutor>,
    input: Value,
    job_id: Uuid,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    token: CancellationToken,
}

/// Run one step to a terminal per-step status: success, or failure after
/// exhausting its retry budget. Timeouts count as failures for retry
/// purposes; cancellation never retries.
async fn run_step<R: JobRepository>(
    params: StepRunParams<R>,
) -> Result<(String, Value), JobFailure> {
    let StepRunParams {
        repo,
        event_bus,
        permits,
        step,
        executor,
        input,
        job_id,
        max_attempts,
        base_delay,
        max_delay,
        token,
    } = params;

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return Err(JobFailure {
                step_id: step.id.clone(),
                attempts: 0,
                message: "stage semaphore closed".to_string(),
            });
        }
    };

    let timeout = Duration::from_secs(step.timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS));
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let exec = StepExecution::started(job_id, &step.id, attempt);
        let exec_id = exec.id;
        if let Err(e) = repo.create_step(&exec).await {
            return Err(JobFailure {
                step_id: step.id.clone(),
                attempts: attempt,
                message: format!("step log write failed: {e}"),
            });
        }
        event_bus.publish(EngineEvent::StepStarted {
            job_id,
            step_id: step.id.clone(),
            attempt,
        });

        let start = std::time::Instant::now();
        let result = tokio::select! {
            _ = token.cancelled() => {
                executor.cancel(&step.id).await;
                Err(StepExecutorError::Cancelled)
            }
            res = tokio::time::timeout(timeout, executor.execute(&step.id, &input, timeout)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_elapsed) => Err(StepExecutorError::Timeout),
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                if let Err(e) = repo
                    .update_step(&exec_id, StepExecutionStatus::Completed, Some(&output), None)
                    .await
                {
                    return Err(JobFailure {
                        step_id: step.id.clone(),
                        attempts: attempt,
                        message: format!("step log write failed: {e}"),
                    });
                }
                event_bus.publish(EngineEvent::StepCompleted {
                    job_id,
                    step_id: step.id.clone(),
                    duration_ms,
                });
                return Ok((step.id, output));
            }
            Err(err) => {
                let message = err.to_string();
                let will_retry = attempt < max_attempts && !err.is_cancelled();
                if let Err(e) = repo
                    .update_step(
                        &exec_id,
                        StepExecutionStatus::Failed,
                        None,
                        Some(&message),
                    )
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "failed to record step failure");
                }
                event_bus.publish(EngineEvent::StepFailed {
                    job_id,
                    step_id: step.id.clone(),
                    error: message.clone(),
                    will_retry,
                });

                if !will_retry {
                    return Err(JobFailure {
                        step_id: step.id.clone(),
                        attempts: attempt,
                        message,
                    });
                }

                let delay = backoff_delay(base_delay, max_delay, attempt - 1);
                tracing::debug!(
                    job_id = %job_id,
                    step_id = step.id.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying step after backoff"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(JobFailure {
                            step_id: step.id.clone(),
                            attempts: attempt,
                            message: StepExecutorError::Cancelled.to_string(),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCheckpointRepository, MemoryJobRepository};
    use serde_json::json;
    use stagecraft_types::workflow::RetryPolicy;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    type TestEngine = Arc<JobEngine<MemoryJobRepository, MemoryCheckpointRepository>>;

    // -----------------------------------------------------------------------
    // Test executors
    // -----------------------------------------------------------------------

    struct EchoExecutor;

    impl super::super::step_executor::StepExecutor for EchoExecutor {
        async fn execute(
            &self,
            step_id: &str,
            input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            Ok(json!({"step": step_id, "input": input.clone()}))
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    struct AlwaysFailExecutor {
        calls: Arc<AtomicU32>,
    }

    impl super::super::step_executor::StepExecutor for AlwaysFailExecutor {
        async fn execute(
            &self,
            _step_id: &str,
            _input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StepExecutorError::Failed("induced failure".to_string()))
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    struct FlakyExecutor {
        remaining_failures: Arc<AtomicU32>,
        calls: Arc<AtomicU32>,
    }

    impl super::super::step_executor::StepExecutor for FlakyExecutor {
        async fn execute(
            &self,
            _step_id: &str,
            _input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                Err(StepExecutorError::Failed("transient failure".to_string()))
            } else {
                Ok(json!("recovered"))
            }
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    /// Blocks each execution on a shared semaphore; the test releases
    /// executions one permit at a time.
    struct GatedExecutor {
        gate: Arc<Semaphore>,
        started: Arc<AtomicU32>,
    }

    impl super::super::step_executor::StepExecutor for GatedExecutor {
        async fn execute(
            &self,
            step_id: &str,
            _input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let permit = Arc::clone(&self.gate)
                .acquire_owned()
                .await
                .map_err(|_| StepExecutorError::Failed("gate closed".to_string()))?;
            permit.forget();
            Ok(json!({"step": step_id}))
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    /// Counts calls per step and fails the steps listed in `failing`.
    struct CountingExecutor {
        calls: Arc<DashMap<String, u32>>,
        failing: Arc<StdMutex<HashSet<String>>>,
    }

    impl super::super::step_executor::StepExecutor for CountingExecutor {
        async fn execute(
            &self,
            step_id: &str,
            _input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            *self.calls.entry(step_id.to_string()).or_insert(0) += 1;
            if self
                .failing
                .lock()
                .expect("failing set lock poisoned")
                .contains(step_id)
            {
                Err(StepExecutorError::Failed("induced failure".to_string()))
            } else {
                Ok(json!({"step": step_id}))
            }
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    struct SlowExecutor;

    impl super::super::step_executor::StepExecutor for SlowExecutor {
        async fn execute(
            &self,
            _step_id: &str,
            _input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!("too late"))
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn step(id: &str, executor: &str, deps: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            executor: executor.to_string(),
            depends_on: deps.into_iter().map(String::from).collect(),
            parallel_ok: true,
            timeout_secs: None,
            retry: None,
        }
    }

    fn wf(name: &str, steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: None,
            version: "1.0.0".to_string(),
            timeout_secs: None,
            steps,
            metadata: Default::default(),
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            max_concurrent_jobs: 2,
            queue_capacity: 8,
            max_parallel_steps_per_stage: 4,
            max_retries: 3,
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 40,
            checkpoint_retention_count: 10,
            ..EngineConfig::default()
        }
    }

    fn engine_with(registry: ExecutorRegistry, config: EngineConfig) -> TestEngine {
        JobEngine::new(
            MemoryJobRepository::new(),
            MemoryCheckpointRepository::new(),
            registry,
            EventBus::new(256),
            config,
        )
    }

    fn echo_engine() -> TestEngine {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", BoxStepExecutor::new(EchoExecutor));
        engine_with(registry, test_config())
    }

    async fn wait_for_status(engine: &TestEngine, job_id: Uuid, status: JobStatus) -> Job {
        for _ in 0..600 {
            let job = engine.get_job(job_id).await.expect("job should exist");
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for job {job_id} to reach {status}");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..600 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for condition");
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn submit_unknown_workflow_rejected() {
        let engine = echo_engine();
        let err = engine.submit("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn register_rejects_cyclic_workflow() {
        let engine = echo_engine();
        let err = engine
            .register_workflow(wf(
                "cyclic",
                vec![step("a", "echo", vec!["b"]), step("b", "echo", vec!["a"])],
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Compile(CompileError::CyclicDependency { .. })
        ));
    }

    #[tokio::test]
    async fn register_rejects_unknown_executor() {
        let engine = echo_engine();
        let err = engine
            .register_workflow(wf("bad", vec![step("a", "missing", vec![])]))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownExecutor { .. }));
    }

    // -----------------------------------------------------------------------
    // Happy path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn diamond_job_runs_to_completion() {
        let engine = echo_engine();
        engine
            .register_workflow(wf(
                "diamond",
                vec![
                    step("a", "echo", vec![]),
                    step("b", "echo", vec!["a"]),
                    step("c", "echo", vec!["a"]),
                    step("d", "echo", vec!["b", "c"]),
                ],
            ))
            .unwrap();

        let job_id = engine.submit("diamond", json!({"topic": "ai"})).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::Completed).await;

        assert_eq!(job.progress.completed_steps, 4);
        assert_eq!(job.progress.total_steps, 4);
        assert!(job.failure.is_none());

        // One checkpoint per completed stage
        let checkpoints = engine.checkpoints().list(job_id).await.unwrap();
        assert_eq!(checkpoints.len(), 3);
        assert_eq!(checkpoints[0].label, "stage-0");
        assert_eq!(checkpoints[2].label, "stage-2");

        // The final snapshot carries every step output
        let latest = engine.checkpoints().latest(job_id).await.unwrap().unwrap();
        let snapshot = StageSnapshot::from_value(latest.state).unwrap();
        assert_eq!(snapshot.stage, 2);
        assert_eq!(snapshot.context.completed_count(), 4);
        assert!(snapshot.context.get_step_output("d").is_some());

        // Step logs all completed
        let steps = engine.repo().list_steps(&job_id).await.unwrap();
        assert_eq!(steps.len(), 4);
        assert!(
            steps
                .iter()
                .all(|s| s.status == StepExecutionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn dependent_step_receives_upstream_output() {
        let engine = echo_engine();
        engine
            .register_workflow(wf(
                "chain",
                vec![step("first", "echo", vec![]), step("second", "echo", vec!["first"])],
            ))
            .unwrap();

        let job_id = engine.submit("chain", json!({"n": 7})).await.unwrap();
        wait_for_status(&engine, job_id, JobStatus::Completed).await;

        let latest = engine.checkpoints().latest(job_id).await.unwrap().unwrap();
        let snapshot = StageSnapshot::from_value(latest.state).unwrap();
        let second = snapshot.context.get_step_output("second").unwrap();
        // The echo executor reflects its input, so the dependency's output
        // must show up under deps.first
        assert_eq!(second["input"]["deps"]["first"]["step"], "first");
        assert_eq!(second["input"]["params"]["n"], 7);
    }

    // -----------------------------------------------------------------------
    // Failure & retries
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn exhausted_retries_fail_the_job() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "boom",
            BoxStepExecutor::new(AlwaysFailExecutor {
                calls: Arc::clone(&calls),
            }),
        );
        let engine = engine_with(registry, test_config());

        let mut failing_step = step("explode", "boom", vec![]);
        failing_step.retry = Some(RetryPolicy { max_attempts: 2 });
        engine.register_workflow(wf("doomed", vec![failing_step])).unwrap();

        let job_id = engine.submit("doomed", json!({})).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::Failed).await;

        let failure = job.failure.expect("failed job must carry a failure");
        assert_eq!(failure.step_id, "explode");
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("induced failure"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Both attempts left step logs
        let steps = engine.repo().list_steps(&job_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == StepExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn flaky_step_recovers_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "flaky",
            BoxStepExecutor::new(FlakyExecutor {
                remaining_failures: Arc::new(AtomicU32::new(2)),
                calls: Arc::clone(&calls),
            }),
        );
        let engine = engine_with(registry, test_config());

        let mut flaky_step = step("wobble", "flaky", vec![]);
        flaky_step.retry = Some(RetryPolicy { max_attempts: 3 });
        engine.register_workflow(wf("flaky-wf", vec![flaky_step])).unwrap();

        let job_id = engine.submit("flaky-wf", json!({})).await.unwrap();
        wait_for_status(&engine, job_id, JobStatus::Completed).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn step_timeout_is_a_failure() {
        let mut registry = ExecutorRegistry::new();
        registry.register("slow", BoxStepExecutor::new(SlowExecutor));
        let engine = engine_with(registry, test_config());

        let mut slow_step = step("crawl", "slow", vec![]);
        slow_step.timeout_secs = Some(1);
        slow_step.retry = Some(RetryPolicy { max_attempts: 1 });
        engine.register_workflow(wf("sluggish", vec![slow_step])).unwrap();

        let job_id = engine.submit("sluggish", json!({})).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::Failed).await;
        let failure = job.failure.unwrap();
        assert!(failure.message.contains("timed out"));
    }

    // -----------------------------------------------------------------------
    // Invalid transitions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn resume_on_completed_job_is_invalid() {
        let engine = echo_engine();
        engine
            .register_workflow(wf("solo", vec![step("only", "echo", vec![])]))
            .unwrap();
        let job_id = engine.submit("solo", json!({})).await.unwrap();
        wait_for_status(&engine, job_id, JobStatus::Completed).await;

        let err = engine.resume(job_id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Running,
                ..
            }
        ));

        // Status unchanged
        let job = engine.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn pause_on_pending_job_is_invalid() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "gated",
            BoxStepExecutor::new(GatedExecutor {
                gate: Arc::clone(&gate),
                started: Arc::clone(&started),
            }),
        );
        let mut config = test_config();
        config.max_concurrent_jobs = 1;
        let engine = engine_with(registry, config);
        engine
            .register_workflow(wf("gated-wf", vec![step("only", "gated", vec![])]))
            .unwrap();

        let first = engine.submit("gated-wf", json!({})).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;
        // Second job sits in the queue as Pending
        let second = engine.submit("gated-wf", json!({})).await.unwrap();

        let err = engine.pause(second).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        gate.add_permits(2);
        wait_for_status(&engine, first, JobStatus::Completed).await;
        wait_for_status(&engine, second, JobStatus::Completed).await;
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pause_takes_effect_at_stage_boundary() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "gated",
            BoxStepExecutor::new(GatedExecutor {
                gate: Arc::clone(&gate),
                started: Arc::clone(&started),
            }),
        );
        let engine = engine_with(registry, test_config());
        engine
            .register_workflow(wf(
                "two-step",
                vec![step("a", "gated", vec![]), step("b", "gated", vec!["a"])],
            ))
            .unwrap();

        let job_id = engine.submit("two-step", json!({})).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;

        // Pause while step a is in flight, then let it finish
        engine.pause(job_id).await.unwrap();
        gate.add_permits(1);

        let job = wait_for_status(&engine, job_id, JobStatus::Paused).await;
        assert_eq!(started.load(Ordering::SeqCst), 1, "step b must not start");
        assert_eq!(job.progress.completed_steps, 1);

        // Resume re-enters at the first incomplete stage
        engine.resume(job_id).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 2).await;
        gate.add_permits(1);

        let job = wait_for_status(&engine, job_id, JobStatus::Completed).await;
        assert_eq!(job.progress.completed_steps, 2);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancel_running_job() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "gated",
            BoxStepExecutor::new(GatedExecutor {
                gate: Arc::clone(&gate),
                started: Arc::clone(&started),
            }),
        );
        let engine = engine_with(registry, test_config());
        engine
            .register_workflow(wf("cancellable", vec![step("a", "gated", vec![])]))
            .unwrap();

        let job_id = engine.submit("cancellable", json!({})).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;

        engine.cancel(job_id).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::Cancelled).await;
        assert!(job.failure.is_none());
    }

    #[tokio::test]
    async fn cancel_queued_job_directly() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "gated",
            BoxStepExecutor::new(GatedExecutor {
                gate: Arc::clone(&gate),
                started: Arc::clone(&started),
            }),
        );
        let mut config = test_config();
        config.max_concurrent_jobs = 1;
        let engine = engine_with(registry, config);
        engine
            .register_workflow(wf("gated-wf", vec![step("a", "gated", vec![])]))
            .unwrap();

        let first = engine.submit("gated-wf", json!({})).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;
        let second = engine.submit("gated-wf", json!({})).await.unwrap();

        engine.cancel(second).await.unwrap();
        wait_for_status(&engine, second, JobStatus::Cancelled).await;

        gate.add_permits(1);
        wait_for_status(&engine, first, JobStatus::Completed).await;
        // The cancelled job never executed
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // Capacity
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn submit_rejected_when_running_set_and_queue_full() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "gated",
            BoxStepExecutor::new(GatedExecutor {
                gate: Arc::clone(&gate),
                started: Arc::clone(&started),
            }),
        );
        let mut config = test_config();
        config.max_concurrent_jobs = 1;
        config.queue_capacity = 0;
        let engine = engine_with(registry, config);
        engine
            .register_workflow(wf("gated-wf", vec![step("a", "gated", vec![])]))
            .unwrap();

        let first = engine.submit("gated-wf", json!({})).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1).await;

        let err = engine.submit("gated-wf", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { .. }));

        gate.add_permits(1);
        wait_for_status(&engine, first, JobStatus::Completed).await;
    }

    // -----------------------------------------------------------------------
    // Persistence failure
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn checkpoint_write_failure_aborts_job() {
        let engine = echo_engine();
        engine
            .register_workflow(wf("fragile", vec![step("only", "echo", vec![])]))
            .unwrap();

        engine.checkpoints().repo().fail_inserts(true);
        let job_id = engine.submit("fragile", json!({})).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::PersistenceFailure).await;
        let failure = job.failure.unwrap();
        assert!(failure.message.contains("checkpoint"));
    }

    // -----------------------------------------------------------------------
    // Job retry from checkpoint
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn retry_resumes_from_last_checkpoint() {
        let calls: Arc<DashMap<String, u32>> = Arc::new(DashMap::new());
        let failing: Arc<StdMutex<HashSet<String>>> = Arc::new(StdMutex::new(HashSet::new()));
        failing.lock().unwrap().insert("b".to_string());

        let mut registry = ExecutorRegistry::new();
        registry.register(
            "count",
            BoxStepExecutor::new(CountingExecutor {
                calls: Arc::clone(&calls),
                failing: Arc::clone(&failing),
            }),
        );
        let engine = engine_with(registry, test_config());

        let mut step_b = step("b", "count", vec!["a"]);
        step_b.retry = Some(RetryPolicy { max_attempts: 1 });
        engine
            .register_workflow(wf("resumable", vec![step("a", "count", vec![]), step_b]))
            .unwrap();

        let job_id = engine.submit("resumable", json!({})).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::Failed).await;
        let failure = job.failure.unwrap();
        assert_eq!(failure.step_id, "b");
        assert_eq!(failure.attempts, 1);
        assert_eq!(*calls.get("a").unwrap(), 1);
        assert_eq!(*calls.get("b").unwrap(), 1);

        // Fix the step and retry: stage 0 is skipped via the checkpoint
        failing.lock().unwrap().clear();
        engine.retry(job_id).await.unwrap();
        let job = wait_for_status(&engine, job_id, JobStatus::Completed).await;

        assert_eq!(job.retry_count, 1);
        assert!(job.failure.is_none());
        assert_eq!(*calls.get("a").unwrap(), 1, "completed stage must not re-run");
        assert_eq!(*calls.get("b").unwrap(), 2);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(
            "boom",
            BoxStepExecutor::new(AlwaysFailExecutor {
                calls: Arc::clone(&calls),
            }),
        );
        let mut config = test_config();
        config.max_retries = 0;
        let engine = engine_with(registry, config);

        let mut failing_step = step("explode", "boom", vec![]);
        failing_step.retry = Some(RetryPolicy { max_attempts: 1 });
        engine.register_workflow(wf("doomed", vec![failing_step])).unwrap();

        let job_id = engine.submit("doomed", json!({})).await.unwrap();
        wait_for_status(&engine, job_id, JobStatus::Failed).await;

        let err = engine.retry(job_id).await.unwrap_err();
        assert!(matches!(err, EngineError::RetryLimitExceeded { limit: 0, .. }));
    }

    // -----------------------------------------------------------------------
    // Recovery & archival
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn recover_requeues_crashed_jobs_but_not_paused() {
        let engine = echo_engine();
        engine
            .register_workflow(wf("solo", vec![step("only", "echo", vec![])]))
            .unwrap();
        let def = engine.workflow("solo").unwrap();

        // Simulate a crash leftover (Running) and a deliberately paused job
        let mut crashed = Job::new(def.id, "solo", json!({}), 1);
        crashed.status = JobStatus::Running;
        engine.repo().create_job(&crashed).await.unwrap();

        let mut paused = Job::new(def.id, "solo", json!({}), 1);
        paused.status = JobStatus::Paused;
        engine.repo().create_job(&paused).await.unwrap();

        let requeued = engine.recover().await.unwrap();
        assert_eq!(requeued, 1);

        wait_for_status(&engine, crashed.id, JobStatus::Completed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let still_paused = engine.get_job(paused.id).await.unwrap();
        assert_eq!(still_paused.status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn archive_sweep_purges_checkpoints() {
        let engine = echo_engine();
        engine
            .register_workflow(wf("solo", vec![step("only", "echo", vec![])]))
            .unwrap();
        let job_id = engine.submit("solo", json!({})).await.unwrap();
        wait_for_status(&engine, job_id, JobStatus::Completed).await;
        assert!(!engine.checkpoints().list(job_id).await.unwrap().is_empty());

        let archived = engine.archive_finished().await.unwrap();
        assert_eq!(archived, 1);

        let job = engine.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Archived);
        assert!(engine.checkpoints().list(job_id).await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let engine = echo_engine();
        let mut rx = engine.event_bus().subscribe();
        engine
            .register_workflow(wf("solo", vec![step("only", "echo", vec![])]))
            .unwrap();

        let job_id = engine.submit("solo", json!({})).await.unwrap();
        wait_for_status(&engine, job_id, JobStatus::Completed).await;

        let mut seen = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            assert_eq!(envelope.correlation_id, job_id);
            seen.push(envelope.event_type);
        }

        for expected in [
            "job.pending",
            "job.running",
            "step.started",
            "step.completed",
            "checkpoint.saved",
            "job.completed",
        ] {
            assert!(seen.contains(&expected.to_string()), "missing {expected} in {seen:?}");
        }
        let pending_idx = seen.iter().position(|t| t == "job.pending").unwrap();
        let completed_idx = seen.iter().position(|t| t == "job.completed").unwrap();
        assert!(pending_idx < completed_idx);
    }
}
