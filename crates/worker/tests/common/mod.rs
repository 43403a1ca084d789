//! In-memory stores and scripted drivers for dispatcher tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use geoincra_core::types::DbId;
use geoincra_db::models::credential::Credential;
use geoincra_db::models::document::NewDocument;
use geoincra_db::models::job::{Job, JobOutcome};
use geoincra_db::models::result::NewAutomationResult;
use geoincra_db::models::status::JobStatus;
use geoincra_portals::driver::{
    DriveSummary, DriverError, ItemOutcome, OutcomeSink, PortalCredentials, SiteDriver,
};
use geoincra_portals::launcher::{Portal, PortalLauncher};
use geoincra_portals::ri_digital::{ListingEntry, RiDigitalPortal};
use geoincra_portals::webdriver::BrowserError;
use geoincra_worker::stores::{ClaimScope, CredentialStore, JobStore, ResultStore, StoreError};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub fn pending_job(id: DbId, job_type: &str, project_id: Option<DbId>, payload: Value) -> Job {
    Job {
        id,
        job_type: job_type.to_string(),
        status: JobStatus::Pending,
        user_id: 7,
        project_id,
        payload,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        error_message: None,
    }
}

pub fn credential(user_id: DbId, provider: &str, login: &str, secret: &str) -> Credential {
    Credential {
        id: 1,
        user_id,
        provider: provider.to_string(),
        login: login.to_string(),
        password_encrypted: secret.to_string(),
        active: true,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Implements every store over vectors. Records each finalize call.
#[derive(Default)]
pub struct MemoryStore {
    pub jobs: Mutex<Vec<Job>>,
    pub credentials: Mutex<Vec<Credential>>,
    pub results: Mutex<Vec<(DbId, NewAutomationResult)>>,
    pub documents: Mutex<Vec<(DbId, DbId, NewDocument)>>,
    pub finalize_calls: Mutex<Vec<(DbId, JobOutcome)>>,
    pub fail_documents: AtomicBool,
    pub fail_results: AtomicBool,
}

impl MemoryStore {
    pub fn with_jobs(jobs: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        })
    }

    pub fn add_credential(&self, credential: Credential) {
        self.credentials.lock().unwrap().push(credential);
    }

    pub fn job(&self, id: DbId) -> Job {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .unwrap()
    }

    pub fn results_for(&self, job_id: DbId) -> Vec<NewAutomationResult> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn finalize_count(&self, job_id: DbId) -> usize {
        self.finalize_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .count()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim(&self, scope: &ClaimScope) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending && scope.admits(&j.job_type))
            .min_by_key(|j| (j.created_at, j.id));
        Ok(next.map(|job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        self.finalize_calls
            .lock()
            .unwrap()
            .push((job_id, outcome.clone()));
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
        else {
            return Ok(false);
        };
        job.status = outcome.status();
        job.finished_at = Some(Utc::now());
        job.error_message = outcome.error_message().map(str::to_string);
        Ok(true)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn lookup(&self, user_id: DbId, provider: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.user_id == user_id && c.provider == provider && c.active)
            .cloned())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_result(
        &self,
        job_id: DbId,
        result: &NewAutomationResult,
    ) -> Result<DbId, StoreError> {
        if self.fail_results.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("results table offline".into()));
        }
        let mut results = self.results.lock().unwrap();
        results.push((job_id, result.clone()));
        Ok(results.len() as DbId)
    }

    async fn register_document(
        &self,
        project_id: Option<DbId>,
        document: &NewDocument,
    ) -> Result<Option<DbId>, StoreError> {
        let Some(project_id) = project_id else {
            return Ok(None);
        };
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("documents table offline".into()));
        }
        let mut documents = self.documents.lock().unwrap();
        let id = 100 + documents.len() as DbId;
        documents.push((id, project_id, document.clone()));
        Ok(Some(id))
    }
}

// ---------------------------------------------------------------------------
// Scripted driver
// ---------------------------------------------------------------------------

pub enum DriverScript {
    /// Hand these outcomes to the sink, then succeed.
    Items(Vec<ItemOutcome>),
    /// Hand these outcomes, then fail with `AuthenticationFailed(msg)`.
    FailAfter(Vec<ItemOutcome>, String),
}

pub struct FakeDriver {
    job_type: &'static str,
    provider: Option<&'static str>,
    script: DriverScript,
    pub calls: AtomicUsize,
    pub seen_credentials: Mutex<Vec<Option<PortalCredentials>>>,
}

impl FakeDriver {
    pub fn new(
        job_type: &'static str,
        provider: Option<&'static str>,
        script: DriverScript,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_type,
            provider,
            script,
            calls: AtomicUsize::new(0),
            seen_credentials: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteDriver for FakeDriver {
    fn job_type(&self) -> &'static str {
        self.job_type
    }

    fn credential_provider(&self) -> Option<&'static str> {
        self.provider
    }

    async fn execute(
        &self,
        _job: &Job,
        credentials: Option<&PortalCredentials>,
        sink: &mut dyn OutcomeSink,
    ) -> Result<DriveSummary, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_credentials
            .lock()
            .unwrap()
            .push(credentials.cloned());

        let (items, failure) = match &self.script {
            DriverScript::Items(items) => (items, None),
            DriverScript::FailAfter(items, msg) => (items, Some(msg.clone())),
        };
        for item in items {
            sink.accept(item.clone()).await?;
        }
        match failure {
            Some(msg) => Err(DriverError::AuthenticationFailed(msg)),
            None => Ok(DriveSummary {
                discovered: items.len(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted RI Digital portal
// ---------------------------------------------------------------------------

/// Shared record of what the scripted portal was asked to do.
#[derive(Default)]
pub struct PortalLog {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl PortalLog {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Listing content and failure points of the scripted portal.
#[derive(Clone, Default)]
pub struct RiScript {
    pub rows: Vec<Vec<String>>,
    pub reject_login: bool,
    /// Protocolos whose PDF download fails.
    pub broken_downloads: Vec<String>,
}

pub fn listing_row(protocolo: &str, date: &str, matricula: &str) -> Vec<String> {
    vec![
        "Abrir".into(),
        protocolo.into(),
        date.into(),
        matricula.into(),
        "1º Ofício de Sinop".into(),
    ]
}

struct ScriptedRiPortal {
    script: RiScript,
    log: Arc<PortalLog>,
    open: Option<ListingEntry>,
}

#[async_trait]
impl Portal for ScriptedRiPortal {
    async fn close(&mut self) -> Result<(), BrowserError> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RiDigitalPortal for ScriptedRiPortal {
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError> {
        self.log.push(format!("login:{}", credentials.login));
        if self.script.reject_login {
            return Err(DriverError::AuthenticationFailed(
                "ServicosOnline.aspx never loaded".into(),
            ));
        }
        Ok(())
    }

    async fn open_listing(&mut self) -> Result<(), DriverError> {
        self.log.push("open_listing");
        Ok(())
    }

    async fn listing_rows(&mut self) -> Result<Vec<Vec<String>>, DriverError> {
        Ok(self.script.rows.clone())
    }

    async fn return_to_listing(&mut self) -> Result<(), BrowserError> {
        self.log.push("return_to_listing");
        self.open = None;
        Ok(())
    }

    async fn open_order(&mut self, entry: &ListingEntry) -> Result<(), BrowserError> {
        self.log.push(format!("open_order:{}", entry.protocolo));
        self.open = Some(entry.clone());
        Ok(())
    }

    async fn order_text(&mut self) -> Result<String, BrowserError> {
        let entry = self.open.as_ref().ok_or(BrowserError::Closed)?;
        Ok(format!("Pedido VM{:06} - protocolo {}", entry.ordinal + 1, entry.protocolo))
    }

    async fn download_pdf(&mut self, dest: &Path) -> Result<(), BrowserError> {
        let entry = self.open.as_ref().ok_or(BrowserError::Closed)?;
        if self.script.broken_downloads.contains(&entry.protocolo) {
            return Err(BrowserError::Timeout("download never completed".into()));
        }
        let body = format!("%PDF-1.4 matricula {}", entry.matricula);
        tokio::fs::write(dest, body).await?;
        Ok(())
    }
}

pub struct ScriptedRiLauncher {
    script: RiScript,
    pub log: Arc<PortalLog>,
}

impl ScriptedRiLauncher {
    pub fn new(script: RiScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            log: Arc::new(PortalLog::default()),
        })
    }
}

#[async_trait]
impl PortalLauncher<dyn RiDigitalPortal> for ScriptedRiLauncher {
    async fn launch(&self) -> Result<Box<dyn RiDigitalPortal>, BrowserError> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedRiPortal {
            script: self.script.clone(),
            log: Arc::clone(&self.log),
            open: None,
        }))
    }
}

/// Serving-side path of a worker file under `data_dir`.
pub fn serving(base: &str, rest: &str) -> PathBuf {
    Path::new(base).join(rest)
}
