//! SQLite job repository implementation.
//!
//! Implements `JobRepository` from `stagecraft-core` using sqlx with split
//! read/write pools. Job params and structured failures are stored as JSON
//! blobs; status strings match the serde snake_case form so recovery queries
//! can filter directly in SQL.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stagecraft_core::repository::job::JobRepository;
use stagecraft_types::error::RepositoryError;
use stagecraft_types::job::{
    Job, JobFailure, JobProgress, JobStatus, StepExecution, StepExecutionStatus,
};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `JobRepository`.
pub struct SqliteJobRepository {
    pool: DatabasePool,
}

impl SqliteJobRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct JobRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    status: String,
    params: String,
    completed_steps: i64,
    total_steps: i64,
    current_stage: i64,
    retry_count: i64,
    failure: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            params: row.try_get("params")?,
            completed_steps: row.try_get("completed_steps")?,
            total_steps: row.try_get("total_steps")?,
            current_stage: row.try_get("current_stage")?,
            retry_count: row.try_get("retry_count")?,
            failure: row.try_get("failure")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_job(self) -> Result<Job, RepositoryError> {
        let status: JobStatus = self.status.parse().map_err(RepositoryError::Query)?;

        let params: serde_json::Value = serde_json::from_str(&self.params)
            .map_err(|e| RepositoryError::Query(format!("invalid params JSON: {e}")))?;

        let failure: Option<JobFailure> = self
            .failure
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid failure JSON: {e}")))
            })
            .transpose()?;

        Ok(Job {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            status,
            params,
            progress: JobProgress {
                completed_steps: self.completed_steps as u32,
                total_steps: self.total_steps as u32,
                current_stage: self.current_stage as u32,
            },
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            retry_count: self.retry_count as u32,
            failure,
        })
    }
}

struct StepRow {
    id: String,
    job_id: String,
    step_id: String,
    status: String,
    attempt: i64,
    output: Option<String>,
    error: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_step(self) -> Result<StepExecution, RepositoryError> {
        let status: StepExecutionStatus = self.status.parse().map_err(RepositoryError::Query)?;

        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid output JSON: {e}")))
            })
            .transpose()?;

        Ok(StepExecution {
            id: parse_uuid(&self.id)?,
            job_id: parse_uuid(&self.job_id)?,
            step_id: self.step_id,
            status,
            attempt: self.attempt as u32,
            output,
            error: self.error,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

const UNFINISHED_STATUSES: &str = "('pending', 'running', 'paused', 'retrying')";
const FINISHED_STATUSES: &str = "('completed', 'failed', 'cancelled', 'persistence_failure')";

// ---------------------------------------------------------------------------
// JobRepository impl
// ---------------------------------------------------------------------------

impl JobRepository for SqliteJobRepository {
    async fn create_job(&self, job: &Job) -> Result<(), RepositoryError> {
        let params_json = serde_json::to_string(&job.params)
            .map_err(|e| RepositoryError::Query(format!("serialize params: {e}")))?;
        let failure_json = job
            .failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize failure: {e}")))?;

        sqlx::query(
            r#"INSERT INTO jobs
               (id, workflow_id, workflow_name, status, params, completed_steps,
                total_steps, current_stage, retry_count, failure, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(job.workflow_id.to_string())
        .bind(&job.workflow_name)
        .bind(job.status.as_str())
        .bind(params_json)
        .bind(job.progress.completed_steps as i64)
        .bind(job.progress.total_steps as i64)
        .bind(job.progress.current_stage as i64)
        .bind(job.retry_count as i64)
        .bind(failure_json)
        .bind(format_datetime(&job.created_at))
        .bind(format_datetime(&job.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        let failure_json = job
            .failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize failure: {e}")))?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = ?, completed_steps = ?, total_steps = ?, current_stage = ?,
                   retry_count = ?, failure = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(job.status.as_str())
        .bind(job.progress.completed_steps as i64)
        .bind(job.progress.total_steps as i64)
        .bind(job.progress.current_stage as i64)
        .bind(job.retry_count as i64)
        .bind(failure_json)
        .bind(format_datetime(&job.updated_at))
        .bind(job.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.map(|r| {
            JobRow::from_row(&r)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_job()
        })
        .transpose()
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, RepositoryError> {
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN {UNFINISHED_STATUSES} ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                JobRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_job()
            })
            .collect()
    }

    async fn list_finished(&self) -> Result<Vec<Job>, RepositoryError> {
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN {FINISHED_STATUSES} ORDER BY updated_at ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                JobRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_job()
            })
            .collect()
    }

    async fn create_step(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let output_json = step
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))?;

        sqlx::query(
            r#"INSERT INTO job_steps
               (id, job_id, step_id, status, attempt, output, error, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.job_id.to_string())
        .bind(&step.step_id)
        .bind(step.status.as_str())
        .bind(step.attempt as i64)
        .bind(output_json)
        .bind(&step.error)
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_step(
        &self,
        exec_id: &Uuid,
        status: StepExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let output_json = output
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))?;

        let result = sqlx::query(
            "UPDATE job_steps SET status = ?, output = ?, error = ?, finished_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(output_json)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(exec_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_steps(&self, job_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows =
            sqlx::query("SELECT * FROM job_steps WHERE job_id = ? ORDER BY started_at ASC, id ASC")
                .bind(job_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                StepRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_step()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
