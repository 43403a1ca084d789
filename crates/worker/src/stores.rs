//! Storage seams of the dispatcher.
//!
//! The dispatcher only talks to these traits; [`PgStore`] implements all of
//! them on top of the `geoincra-db` repositories, and the integration tests
//! substitute in-memory versions.

use async_trait::async_trait;
use geoincra_core::types::DbId;
use geoincra_db::models::credential::Credential;
use geoincra_db::models::document::NewDocument;
use geoincra_db::models::job::{Job, JobOutcome};
use geoincra_db::models::result::NewAutomationResult;
use geoincra_db::repositories::{CredentialRepo, DocumentRepo, JobRepo, ResultRepo};
use geoincra_db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A non-database backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which pending jobs this worker may claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimScope {
    /// Any type; unsupported types are claimed and failed.
    Any,
    /// Only the listed types.
    Types(Vec<String>),
}

impl ClaimScope {
    pub fn admits(&self, job_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Types(types) => types.iter().any(|t| t == job_type),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claim the oldest pending job in `scope`, moving it to PROCESSING.
    async fn claim(&self, scope: &ClaimScope) -> Result<Option<Job>, StoreError>;

    /// Terminal write; `false` when the job was not PROCESSING.
    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The active credential of `user_id` for `provider`.
    async fn lookup(&self, user_id: DbId, provider: &str) -> Result<Option<Credential>, StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert_result(
        &self,
        job_id: DbId,
        result: &NewAutomationResult,
    ) -> Result<DbId, StoreError>;

    /// Register a project document; `None` (no write) without a project.
    async fn register_document(
        &self,
        project_id: Option<DbId>,
        document: &NewDocument,
    ) -> Result<Option<DbId>, StoreError>;
}

/// Postgres-backed implementation of every store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn claim(&self, scope: &ClaimScope) -> Result<Option<Job>, StoreError> {
        let job = match scope {
            ClaimScope::Any => JobRepo::claim_any(&self.pool).await?,
            ClaimScope::Types(types) => JobRepo::claim_next_of_types(&self.pool, types).await?,
        };
        Ok(job)
    }

    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        Ok(JobRepo::finalize(&self.pool, job_id, outcome).await?)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn lookup(&self, user_id: DbId, provider: &str) -> Result<Option<Credential>, StoreError> {
        Ok(CredentialRepo::find_active(&self.pool, user_id, provider).await?)
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn insert_result(
        &self,
        job_id: DbId,
        result: &NewAutomationResult,
    ) -> Result<DbId, StoreError> {
        Ok(ResultRepo::insert(&self.pool, job_id, result).await?)
    }

    async fn register_document(
        &self,
        project_id: Option<DbId>,
        document: &NewDocument,
    ) -> Result<Option<DbId>, StoreError> {
        Ok(DocumentRepo::register(&self.pool, project_id, document).await?)
    }
}
