//! Job repository trait definition.
//!
//! Defines the storage interface for job records and step execution logs.
//! The contract is durable write-before-acknowledge: a returned `Ok` means
//! the record survives process restart.
//!
//! Uses native async fn in traits (no async_trait macro).

use stagecraft_types::error::RepositoryError;
use stagecraft_types::job::{Job, StepExecution, StepExecutionStatus};
use uuid::Uuid;

/// Repository trait for job persistence.
///
/// Covers two entity families:
/// - **Jobs:** create/update/query job records, plus startup recovery and
///   retention queries.
/// - **Steps:** create/update/query individual step execution logs.
pub trait JobRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Persist a new job record.
    fn create_job(
        &self,
        job: &Job,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist the current state of a job (status, progress, failure).
    fn update_job(
        &self,
        job: &Job,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a job by its UUID.
    fn get_job(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Job>, RepositoryError>> + Send;

    /// List jobs whose status is non-terminal (startup recovery).
    fn list_unfinished(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, RepositoryError>> + Send;

    /// List jobs in a terminal (but not yet archived) status, for the
    /// retention sweep.
    fn list_finished(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Create a new step execution log entry.
    fn create_step(
        &self,
        step: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Finalize a step execution: status plus optional output/error.
    fn update_step(
        &self,
        exec_id: &Uuid,
        status: StepExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all step executions for a job, ordered by start time.
    fn list_steps(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;
}
