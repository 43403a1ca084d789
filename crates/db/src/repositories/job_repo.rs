//! Repository for the `automation_jobs` table.
//!
//! Claiming is a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP
//! LOCKED) RETURNING` statement: the row is selected, locked, moved to
//! `PROCESSING` and returned atomically, and rows locked by a concurrent
//! claim are skipped instead of waited on.

use geoincra_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{Job, JobOutcome, NewJob};
use crate::models::status::JobStatus;

/// Column list for `automation_jobs` queries.
const COLUMNS: &str = "\
    id, type, status, user_id, project_id, payload, \
    created_at, started_at, finished_at, error_message";

/// Provides queue operations for automation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a pending job. Jobs are normally created by the backend; the
    /// worker only uses this from tests.
    pub async fn enqueue(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO automation_jobs (type, status, user_id, project_id, payload) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(&input.job_type)
            .bind(JobStatus::Pending.as_str())
            .bind(input.user_id)
            .bind(input.project_id)
            .bind(&input.payload)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest pending job of `job_type`.
    ///
    /// Returns `None` when no unlocked pending row of that type exists.
    pub async fn claim_next(pool: &PgPool, job_type: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE automation_jobs \
             SET status = $1, started_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM automation_jobs \
                 WHERE status = $2 AND type = $3 \
                 ORDER BY created_at, id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(job_type)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the oldest pending job whose type is in `job_types`.
    pub async fn claim_next_of_types(
        pool: &PgPool,
        job_types: &[String],
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE automation_jobs \
             SET status = $1, started_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM automation_jobs \
                 WHERE status = $2 AND type = ANY($3) \
                 ORDER BY created_at, id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(job_types)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the oldest pending job of any type.
    ///
    /// Used when the worker is not restricted to a type list, so jobs of
    /// unknown types are also picked up (and failed by the dispatcher).
    pub async fn claim_any(pool: &PgPool) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE automation_jobs \
             SET status = $1, started_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM automation_jobs \
                 WHERE status = $2 \
                 ORDER BY created_at, id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Processing.as_str())
            .bind(JobStatus::Pending.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Move a claimed job to its terminal state and stamp `finished_at`.
    ///
    /// Only a `PROCESSING` row is updated, so a repeated call is a no-op.
    /// Returns `true` if this call performed the transition.
    pub async fn finalize(
        pool: &PgPool,
        job_id: DbId,
        outcome: &JobOutcome,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE automation_jobs \
             SET status = $2, error_message = $3, finished_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(job_id)
        .bind(outcome.status().as_str())
        .bind(outcome.error_message())
        .bind(JobStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM automation_jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
