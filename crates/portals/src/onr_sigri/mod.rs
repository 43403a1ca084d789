//! ONR SIG-RI map consultation driver.
//!
//! Searches the SIG-RI map by CAR code or address, opens the details
//! panel of the parcel under the map centre and downloads its polygon as
//! KMZ. A job yields at most one item and must belong to a project.

mod page;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use geoincra_core::job_types::{CONTENT_TYPE_KMZ, DOC_TYPE_ONR_SIGRI_POLIGONO, ONR_SIGRI_CONSULTA};
use geoincra_core::storage::{safe_filename, StoragePaths};
use geoincra_db::models::job::Job;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::driver::{
    Artifact, DocumentSpec, DriveSummary, DriverError, ItemFailureKind, ItemFields, ItemOutcome,
    OutcomeSink, PortalCredentials, SiteDriver,
};
use crate::launcher::{release, Portal, PortalLauncher};
use crate::webdriver::{move_download, BrowserError};

pub use page::WebOnrSigriPortal;

/// `fonte` metadata value.
pub const SOURCE: &str = "ONR_SIGRI";

const DOCUMENT_DESCRIPTION: &str = "Polígono KMZ obtido via consulta ONR/SIG-RI";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Search layer of the SIG-RI map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// Cadastro Ambiental Rural code.
    Car,
    /// Postal address.
    Endereco,
}

impl SearchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Car => "CAR",
            Self::Endereco => "ENDERECO",
        }
    }

    /// Option label in the "Camada de Busca" menu.
    pub fn layer_label(self) -> &'static str {
        match self {
            Self::Car => "Cadastro Ambiental Rural",
            Self::Endereco => "Endereço",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CAR" => Some(Self::Car),
            "ENDERECO" => Some(Self::Endereco),
            _ => None,
        }
    }
}

/// Validated `search` object of an `ONR_SIGRI_CONSULTA` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub kind: SearchKind,
    pub value: String,
}

impl SearchQuery {
    pub fn from_payload(payload: &Value) -> Result<Self, DriverError> {
        let search = payload.get("search").unwrap_or(&Value::Null);
        let kind = search
            .get("type")
            .and_then(Value::as_str)
            .and_then(SearchKind::parse)
            .ok_or_else(|| {
                DriverError::InvalidPayload("search.type must be CAR or ENDERECO".into())
            })?;
        let value = search
            .get("value")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if value.is_empty() {
            return Err(DriverError::InvalidPayload("search.value is empty".into()));
        }
        Ok(Self {
            kind,
            value: value.to_string(),
        })
    }

    fn to_json(&self) -> Value {
        json!({ "type": self.kind.as_str(), "value": self.value })
    }
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// Client certificate (A1, PKCS#12) the portal authenticates with.
#[derive(Clone, Default)]
pub struct CertificateConfig {
    pub pfx_path: Option<PathBuf>,
    pub password: String,
}

impl std::fmt::Debug for CertificateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateConfig")
            .field("pfx_path", &self.pfx_path)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CertificateConfig {
    /// The certificate file must exist and its password must be set.
    pub async fn validate(&self) -> Result<(), DriverError> {
        let path = self.pfx_path.as_deref().ok_or_else(|| {
            DriverError::Misconfigured("ONR certificate not configured (set ONR_PFX_PATH)".into())
        })?;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DriverError::Misconfigured(format!(
                "ONR certificate not found at {}",
                path.display()
            )));
        }
        if self.password.is_empty() {
            return Err(DriverError::Misconfigured(
                "ONR certificate password not configured (set ONR_PFX_PASSWORD)".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Details panel
// ---------------------------------------------------------------------------

/// Parcel attributes read from the details panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParcelDetails {
    pub camada: Option<String>,
    pub codigo_sigef: Option<String>,
    pub nome_area: Option<String>,
    pub matricula: Option<String>,
    pub municipio: Option<String>,
    pub uf: Option<String>,
    pub ccir_sncr: Option<String>,
}

impl ParcelDetails {
    pub fn from_block(block: &str) -> Self {
        Self {
            camada: extract_label(block, &["Camada"]),
            codigo_sigef: extract_label(block, &["Código Sigef", "Código SIGEF"]),
            nome_area: extract_label(block, &["Nome da Área", "Nome da Area"]),
            matricula: extract_label(block, &["Matrícula", "Matricula"]),
            municipio: extract_label(block, &["Município", "Municipio"]),
            uf: extract_label(block, &["UF"]),
            ccir_sncr: extract_label(block, &["CCIR/SNCR"]),
        }
    }
}

/// Value after the first of `labels` present in `block`, as `Label: value`
/// or `Label:` followed by the value on the next line.
pub fn extract_label(block: &str, labels: &[&str]) -> Option<String> {
    labels.iter().find_map(|label| {
        let pattern = format!(r"(?i){}\s*:\s*([^\n\r]+)", regex::escape(label));
        let re = Regex::new(&pattern).ok()?;
        re.captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Final KMZ filename in the shared `onr-sigri/` directory.
///
/// `onr_{project}_{unix}_{stem}.kmz` when the browser's name already ends in
/// `.kmz`, otherwise `onr_{project}_{sigef}_{unix}.kmz`. Both forms pass
/// through [`safe_filename`].
pub fn kmz_filename(
    suggested: Option<&str>,
    project_id: i64,
    codigo_sigef: Option<&str>,
    unix_secs: i64,
) -> String {
    let portal_stem = suggested.and_then(|name| {
        let at = name.len().checked_sub(".kmz".len())?;
        name.get(at..)?
            .eq_ignore_ascii_case(".kmz")
            .then(|| &name[..at])
    });
    let stem = match portal_stem {
        Some(base) => format!("onr_{project_id}_{unix_secs}_{base}"),
        None => {
            let sigef = codigo_sigef.unwrap_or("sigef");
            format!("onr_{project_id}_{sigef}_{unix_secs}")
        }
    };
    format!("{}.kmz", safe_filename(&stem))
}

// ---------------------------------------------------------------------------
// Portal seam
// ---------------------------------------------------------------------------

/// Navigation primitives of the SIG-RI map.
#[async_trait]
pub trait OnrSigriPortal: Portal {
    /// Try the "Entrar com Certificado Digital" login. Failure is tolerated;
    /// the certificate may already authenticate the session.
    async fn login_with_certificate(&mut self) -> Result<(), BrowserError>;

    /// Open the main map. Fails with [`DriverError::ListingUnavailable`].
    async fn open_map(&mut self) -> Result<(), DriverError>;

    /// Choose the search layer, type the value and pick the first
    /// suggestion.
    async fn search(&mut self, query: &SearchQuery) -> Result<(), DriverError>;

    /// Click the parcel under the map centre.
    async fn select_centre(&mut self) -> Result<(), BrowserError>;

    /// Text of the details panel, `None` when it never opened.
    async fn details_block(&mut self) -> Result<Option<String>, BrowserError>;

    /// Download the polygon; returns the downloaded file.
    async fn download_polygon(&mut self) -> Result<PathBuf, BrowserError>;
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// [`SiteDriver`] for `ONR_SIGRI_CONSULTA`.
pub struct OnrSigriDriver {
    launcher: Arc<dyn PortalLauncher<dyn OnrSigriPortal>>,
    storage: StoragePaths,
    certificate: CertificateConfig,
}

impl OnrSigriDriver {
    pub fn new(
        launcher: Arc<dyn PortalLauncher<dyn OnrSigriPortal>>,
        storage: StoragePaths,
        certificate: CertificateConfig,
    ) -> Self {
        Self {
            launcher,
            storage,
            certificate,
        }
    }

    async fn drive(
        &self,
        portal: &mut dyn OnrSigriPortal,
        job: &Job,
        project_id: i64,
        query: &SearchQuery,
        dir: &Path,
        sink: &mut dyn OutcomeSink,
    ) -> Result<DriveSummary, DriverError> {
        if let Err(e) = portal.login_with_certificate().await {
            tracing::debug!(job_id = job.id, error = %e, "Certificate login button not used");
        }
        portal.open_map().await?;
        portal.search(query).await?;
        portal.select_centre().await?;

        let Some(block) = portal.details_block().await? else {
            tracing::warn!(job_id = job.id, search = %query.value, "SIG-RI details panel did not open");
            return Ok(DriveSummary::default());
        };

        let details = ParcelDetails::from_block(&block);
        let fields = ItemFields {
            matricula: details.matricula.clone(),
            ..Default::default()
        };
        let outcome = ItemOutcome::new(0, fields, metadata(&details, query, &block));

        let outcome = match self.store_polygon(portal, project_id, &details, dir).await {
            Ok(path) => {
                let filename = file_name(&path);
                outcome.with_artifact(Artifact {
                    path,
                    document: DocumentSpec {
                        doc_type: DOC_TYPE_ONR_SIGRI_POLIGONO.to_string(),
                        original_filename: filename,
                        content_type: CONTENT_TYPE_KMZ.to_string(),
                        description: Some(DOCUMENT_DESCRIPTION.to_string()),
                    },
                })
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "SIG-RI polygon download failed");
                outcome.with_failure(
                    ItemFailureKind::ArtifactUnavailable,
                    format!("KMZ download failed: {e}"),
                )
            }
        };

        sink.accept(outcome).await?;
        Ok(DriveSummary { discovered: 1 })
    }

    async fn store_polygon(
        &self,
        portal: &mut dyn OnrSigriPortal,
        project_id: i64,
        details: &ParcelDetails,
        dir: &Path,
    ) -> Result<PathBuf, BrowserError> {
        let downloaded = portal.download_polygon().await?;
        let suggested = downloaded.file_name().map(|n| n.to_string_lossy().into_owned());
        let name = kmz_filename(
            suggested.as_deref(),
            project_id,
            details.codigo_sigef.as_deref(),
            Utc::now().timestamp(),
        );
        let dest = dir.join(name);
        move_download(&downloaded, &dest).await?;
        Ok(dest)
    }
}

fn metadata(details: &ParcelDetails, query: &SearchQuery, block: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("fonte".into(), json!(SOURCE));
    m.insert(
        "consultado_em".into(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    m.insert("camada".into(), json!(details.camada));
    m.insert("codigo_sigef".into(), json!(details.codigo_sigef));
    m.insert("nome_area".into(), json!(details.nome_area));
    m.insert("matricula".into(), json!(details.matricula));
    m.insert("municipio".into(), json!(details.municipio));
    m.insert("uf".into(), json!(details.uf));
    m.insert("ccir_sncr".into(), json!(details.ccir_sncr));
    m.insert("search".into(), query.to_json());
    m.insert("raw_block".into(), json!(block));
    m
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl SiteDriver for OnrSigriDriver {
    fn job_type(&self) -> &'static str {
        ONR_SIGRI_CONSULTA
    }

    fn credential_provider(&self) -> Option<&'static str> {
        None
    }

    async fn execute(
        &self,
        job: &Job,
        _credentials: Option<&PortalCredentials>,
        sink: &mut dyn OutcomeSink,
    ) -> Result<DriveSummary, DriverError> {
        let project_id = job.project_id.ok_or_else(|| {
            DriverError::InvalidPayload(format!("{ONR_SIGRI_CONSULTA} requires project_id"))
        })?;
        let query = SearchQuery::from_payload(&job.payload)?;

        let dir = self.storage.onr_sigri_dir();
        tokio::fs::create_dir_all(&dir).await?;
        self.certificate.validate().await?;

        tracing::info!(
            job_id = job.id,
            project_id,
            search_type = query.kind.as_str(),
            search = %query.value,
            "Starting SIG-RI consultation",
        );

        let mut portal = self.launcher.launch().await?;
        let result = self
            .drive(portal.as_mut(), job, project_id, &query, &dir, sink)
            .await;
        release(portal, job.id).await;
        result
    }
}
