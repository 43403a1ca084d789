//! Sequential job dispatcher.
//!
//! Claims one pending job at a time, resolves its driver and credentials,
//! runs the driver with a [`ResultRecorder`] as the sink and finalizes the
//! job exactly once. When the queue is empty it sleeps for
//! `poll_interval`; that sleep is the only point where shutdown is
//! observed, so a job in progress always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use geoincra_core::credentials::CredentialCipher;
use geoincra_core::storage::StoragePaths;
use geoincra_db::models::job::{Job, JobOutcome};
use geoincra_portals::driver::PortalCredentials;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::persist::ResultRecorder;
use crate::registry::DriverRegistry;
use crate::stores::{ClaimScope, CredentialStore, JobStore, ResultStore, StoreError};

/// Sleep between claims while the queue is empty.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Failure message of a job whose driver found nothing to record.
pub const NO_MATCHING_ITEMS: &str = "no matching items found";

pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    credentials: Arc<dyn CredentialStore>,
    results: Arc<dyn ResultStore>,
    registry: DriverRegistry,
    cipher: CredentialCipher,
    storage: StoragePaths,
    scope: ClaimScope,
    poll_interval: Duration,
    worker_id: String,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        credentials: Arc<dyn CredentialStore>,
        results: Arc<dyn ResultStore>,
        registry: DriverRegistry,
        cipher: CredentialCipher,
        storage: StoragePaths,
        scope: ClaimScope,
    ) -> Self {
        Self {
            jobs,
            credentials,
            results,
            registry,
            cipher,
            storage,
            scope,
            poll_interval: POLL_INTERVAL,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Process jobs until `cancel` fires while the queue is idle.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            worker_id = %self.worker_id,
            job_types = ?self.registry.job_types(),
            scope = ?self.scope,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Dispatcher started",
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(processed) => !processed,
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Dispatch cycle failed");
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Dispatcher shutting down");
    }

    /// Claim and process one job. `Ok(false)` when nothing was pending.
    pub async fn process_next(&self) -> Result<bool, StoreError> {
        let Some(job) = self.jobs.claim(&self.scope).await? else {
            return Ok(false);
        };
        self.process(&job).await?;
        Ok(true)
    }

    /// Run a claimed job to its terminal state and finalize it.
    pub async fn process(&self, job: &Job) -> Result<JobOutcome, StoreError> {
        tracing::debug!(
            job_id = job.id,
            job_type = %job.job_type,
            worker_id = %self.worker_id,
            "Job claimed",
        );

        let outcome = match self.execute(job).await {
            Ok(0) => JobOutcome::failed(NO_MATCHING_ITEMS),
            Ok(_) => JobOutcome::Completed,
            Err(e) => JobOutcome::failed(e.to_string()),
        };

        let applied = self.jobs.finalize(job.id, &outcome).await?;
        if !applied {
            tracing::warn!(job_id = job.id, "Job was no longer PROCESSING at finalize");
        }

        match &outcome {
            JobOutcome::Completed => {
                tracing::info!(job_id = job.id, job_type = %job.job_type, "Job completed");
            }
            JobOutcome::Failed { message } => {
                tracing::info!(
                    job_id = job.id,
                    job_type = %job.job_type,
                    error = %message,
                    "Job failed",
                );
            }
        }
        Ok(outcome)
    }

    /// Returns the number of result rows persisted.
    async fn execute(&self, job: &Job) -> Result<usize, JobError> {
        let driver = self
            .registry
            .get(&job.job_type)
            .ok_or_else(|| JobError::UnsupportedJobType(job.job_type.clone()))?;

        let credentials = match driver.credential_provider() {
            Some(provider) => Some(self.resolve_credentials(job, provider).await?),
            None => None,
        };
        tracing::debug!(
            job_id = job.id,
            with_credentials = credentials.is_some(),
            "Credentials resolved",
        );

        let mut recorder = ResultRecorder::new(self.results.as_ref(), &self.storage, job);
        tracing::debug!(job_id = job.id, "Driving portal");
        let result = driver
            .execute(job, credentials.as_ref(), &mut recorder)
            .await;
        let persisted = recorder.persisted();

        match result {
            Ok(summary) => {
                tracing::debug!(
                    job_id = job.id,
                    discovered = summary.discovered,
                    persisted,
                    "Item loop finished",
                );
                Ok(persisted)
            }
            Err(e) => {
                if persisted > 0 {
                    tracing::debug!(job_id = job.id, persisted, "Driver aborted after persisting items");
                }
                Err(e.into())
            }
        }
    }

    async fn resolve_credentials(
        &self,
        job: &Job,
        provider: &str,
    ) -> Result<PortalCredentials, JobError> {
        let credential = self
            .credentials
            .lookup(job.user_id, provider)
            .await?
            .ok_or_else(|| {
                JobError::MissingCredentials(format!(
                    "no active {provider} credential for user {}",
                    job.user_id
                ))
            })?;

        let secret = self
            .cipher
            .reveal(&credential.password_encrypted)
            .map_err(|e| JobError::MissingCredentials(format!("{provider} secret unusable: {e}")))?;

        let credentials = PortalCredentials::new(credential.login, secret);
        if !credentials.is_complete() {
            return Err(JobError::MissingCredentials(format!(
                "{provider} credential for user {} has an empty login or password",
                job.user_id
            )));
        }
        Ok(credentials)
    }
}
