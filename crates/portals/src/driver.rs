//! The contract between the dispatcher and a site driver.
//!
//! A driver is handed a claimed [`Job`], the resolved credentials (if it
//! needs any) and an [`OutcomeSink`]. It enumerates the items the job
//! selects and hands exactly one [`ItemOutcome`] per item to the sink, in
//! order. Problems confined to one item are reported inside that item's
//! outcome; only conditions that make the whole job pointless (bad payload,
//! login rejected, listing never loads) are returned as [`DriverError`].

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use geoincra_db::models::job::Job;
use serde_json::{Map, Value};

use crate::webdriver::BrowserError;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Decrypted portal login. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct PortalCredentials {
    pub login: String,
    pub secret: String,
}

impl PortalCredentials {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
        }
    }

    /// Both login and secret are non-blank.
    pub fn is_complete(&self) -> bool {
        !self.login.trim().is_empty() && !self.secret.is_empty()
    }
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Item outcomes
// ---------------------------------------------------------------------------

/// Structured columns of an `automation_results` row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFields {
    pub protocolo: Option<String>,
    pub matricula: Option<String>,
    pub cnm: Option<String>,
    pub cartorio: Option<String>,
    pub data_pedido: Option<NaiveDate>,
}

/// How a retrieved file should be registered as a project document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSpec {
    pub doc_type: String,
    pub original_filename: String,
    pub content_type: String,
    pub description: Option<String>,
}

/// A file the driver wrote to the worker volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Worker-side path; translated to the backend path on persistence.
    pub path: PathBuf,
    pub document: DocumentSpec,
}

/// Item-level error categories. Recorded in the result, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFailureKind {
    /// Opening the item or reading its fields failed.
    ItemExtractionFailed,
    /// The item was read but its file could not be retrieved.
    ArtifactUnavailable,
}

impl ItemFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ItemExtractionFailed => "ITEM_EXTRACTION_FAILED",
            Self::ArtifactUnavailable => "ARTIFACT_UNAVAILABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub kind: ItemFailureKind,
    pub reason: String,
}

/// Everything the dispatcher needs to persist one discovered item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    /// Zero-based position among the items the job selected. Serves as the
    /// failure key when no natural key could be read.
    pub index: usize,
    pub fields: ItemFields,
    /// Provider-defined metadata (`fonte`, order numbers, raw text, ...).
    pub metadata: Map<String, Value>,
    pub artifact: Option<Artifact>,
    pub failure: Option<ItemFailure>,
}

impl ItemOutcome {
    pub fn new(index: usize, fields: ItemFields, metadata: Map<String, Value>) -> Self {
        Self {
            index,
            fields,
            metadata,
            artifact: None,
            failure: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_failure(mut self, kind: ItemFailureKind, reason: impl Into<String>) -> Self {
        self.failure = Some(ItemFailure {
            kind,
            reason: reason.into(),
        });
        self
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// What a driver reports after a clean run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Items the job selected, and therefore outcomes handed to the sink.
    pub discovered: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The sink could not persist an outcome.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist item outcome: {0}")]
pub struct SinkError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl SinkError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

/// Job-fatal driver errors. The display text becomes `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("listing unavailable: {0}")]
    ListingUnavailable(String),

    #[error("worker misconfigured: {0}")]
    Misconfigured(String),

    #[error("artifact storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receives item outcomes as the driver produces them.
#[async_trait]
pub trait OutcomeSink: Send {
    async fn accept(&mut self, outcome: ItemOutcome) -> Result<(), SinkError>;
}

/// One implementation per portal / job type.
#[async_trait]
pub trait SiteDriver: Send + Sync {
    /// The `automation_jobs.type` value this driver handles.
    fn job_type(&self) -> &'static str;

    /// The `external_credentials.provider` to resolve before execution, if
    /// the portal needs a stored login.
    fn credential_provider(&self) -> Option<&'static str>;

    /// Drive the portal for `job`, handing each item to `sink` in order.
    async fn execute(
        &self,
        job: &Job,
        credentials: Option<&PortalCredentials>,
        sink: &mut dyn OutcomeSink,
    ) -> Result<DriveSummary, DriverError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = PortalCredentials::new("user@example.com", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("user@example.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn blank_login_or_empty_secret_is_incomplete() {
        assert!(PortalCredentials::new("a", "b").is_complete());
        assert!(!PortalCredentials::new("  ", "b").is_complete());
        assert!(!PortalCredentials::new("a", "").is_complete());
    }

    #[test]
    fn failure_kind_literals() {
        assert_eq!(ItemFailureKind::ItemExtractionFailed.as_str(), "ITEM_EXTRACTION_FAILED");
        assert_eq!(ItemFailureKind::ArtifactUnavailable.as_str(), "ARTIFACT_UNAVAILABLE");
    }

    #[test]
    fn driver_error_messages_are_prefixed_by_category() {
        let err = DriverError::AuthenticationFailed("login page rejected credentials".into());
        assert_eq!(err.to_string(), "authentication failed: login page rejected credentials");
        let err = DriverError::ListingUnavailable("table never rendered".into());
        assert!(err.to_string().starts_with("listing unavailable"));
    }
}
