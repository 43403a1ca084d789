//! Automation job entity and DTOs.

use geoincra_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::JobStatus;

/// A row from the `automation_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub job_type: String,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub user_id: DbId,
    pub project_id: Option<DbId>,
    /// Provider-specific parameters, validated by the driver.
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub error_message: Option<String>,
}

/// DTO for inserting a pending job.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: String,
    pub user_id: DbId,
    pub project_id: Option<DbId>,
    pub payload: serde_json::Value,
}

/// Terminal state written by `finalize`.
///
/// The error message lives inside `Failed`, so a completed job can never
/// carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed { message: String },
}

impl JobOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Completed => None,
            Self::Failed { message } => Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_outcome_has_no_message() {
        let outcome = JobOutcome::Completed;
        assert_eq!(outcome.status(), JobStatus::Completed);
        assert_eq!(outcome.error_message(), None);
    }

    #[test]
    fn failed_outcome_carries_message() {
        let outcome = JobOutcome::failed("no matching items found");
        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(outcome.error_message(), Some("no matching items found"));
    }
}
