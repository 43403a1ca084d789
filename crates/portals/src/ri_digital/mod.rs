//! RI Digital "Visualização de matrícula" driver.
//!
//! Logs in with the user's stored credential, reads the order listing,
//! keeps the rows whose order date falls in the requested range and, for
//! each one, opens the order, reads its `VM` number and downloads the
//! matrícula PDF.

mod page;

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use geoincra_core::dates::{parse_br_date, DateRange};
use geoincra_core::error::CoreError;
use geoincra_core::job_types::{
    CONTENT_TYPE_PDF, DOC_TYPE_RI_DIGITAL_MATRICULA, PROVIDER_RI_DIGITAL, RI_DIGITAL_MATRICULA,
};
use geoincra_core::storage::{path_segment, StoragePaths};
use geoincra_db::models::job::Job;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::driver::{
    Artifact, DocumentSpec, DriveSummary, DriverError, ItemFailureKind, ItemFields, ItemOutcome,
    OutcomeSink, PortalCredentials, SiteDriver,
};
use crate::launcher::{release, Portal, PortalLauncher};
use crate::webdriver::BrowserError;

pub use page::WebRiDigitalPortal;

/// `fonte` metadata value.
pub const SOURCE: &str = "RI_DIGITAL";

/// Listing cells needed for a row to count as an order.
const MIN_CELLS: usize = 5;

const DOCUMENT_DESCRIPTION: &str =
    "PDF obtido via automação RI Digital (Visualização de Matrícula)";

static VM_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(VM\d{6,})\b").expect("valid regex"));

// ---------------------------------------------------------------------------
// Portal seam
// ---------------------------------------------------------------------------

/// Navigation primitives of the RI Digital site.
///
/// The production implementation is [`WebRiDigitalPortal`]; tests script
/// their own.
#[async_trait]
pub trait RiDigitalPortal: Portal {
    /// Log in through "Acesso comum". Fails with
    /// [`DriverError::AuthenticationFailed`] when the home page is not
    /// reached.
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError>;

    /// Open "Visualização de matrícula" and wait for the table. Fails with
    /// [`DriverError::ListingUnavailable`].
    async fn open_listing(&mut self) -> Result<(), DriverError>;

    /// Cell texts of every listing row, in table order.
    async fn listing_rows(&mut self) -> Result<Vec<Vec<String>>, DriverError>;

    /// Navigate to the listing URL and wait for the table, wherever the
    /// browser currently is. Runs before every item.
    async fn return_to_listing(&mut self) -> Result<(), BrowserError>;

    /// Open the order page for `entry`.
    async fn open_order(&mut self, entry: &ListingEntry) -> Result<(), BrowserError>;

    /// Visible text of the open order page.
    async fn order_text(&mut self) -> Result<String, BrowserError>;

    /// Trigger the PDF download on the open order page and save it to `dest`.
    async fn download_pdf(&mut self, dest: &Path) -> Result<(), BrowserError>;
}

// ---------------------------------------------------------------------------
// Payload and listing
// ---------------------------------------------------------------------------

/// Validated `RI_DIGITAL_MATRICULA` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiDigitalPayload {
    pub range: DateRange,
}

impl RiDigitalPayload {
    pub fn from_value(payload: &Value) -> Result<Self, DriverError> {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DriverError::InvalidPayload(format!("missing {name}")))
        };
        let start = field("data_inicio")?;
        let end = field("data_fim")?;
        let range = DateRange::parse(start, end).map_err(|e| match e {
            CoreError::InvalidPayload(msg) => DriverError::InvalidPayload(msg),
            other => DriverError::InvalidPayload(other.to_string()),
        })?;
        Ok(Self { range })
    }
}

/// One order row of the listing.
///
/// Columns: `0 open | 1 protocolo | 2 data | 3 matrícula/CNM | 4 cartório`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Row position in the table, used when the protocolo cannot be found.
    pub ordinal: usize,
    pub protocolo: String,
    pub data_pedido: NaiveDate,
    pub matricula: String,
    pub cartorio: String,
}

impl ListingEntry {
    /// Parse a row; `None` for short rows or rows without a valid date.
    pub fn from_cells(ordinal: usize, cells: &[String]) -> Option<Self> {
        if cells.len() < MIN_CELLS {
            return None;
        }
        let data_pedido = parse_br_date(&cells[2]).ok()?;
        Some(Self {
            ordinal,
            protocolo: cells[1].trim().to_string(),
            data_pedido,
            matricula: cells[3].trim().to_string(),
            cartorio: cells[4].trim().to_string(),
        })
    }

    /// `{protocolo}_{matricula}.pdf` with path separators replaced.
    pub fn pdf_filename(&self) -> String {
        path_segment(&format!("{}_{}.pdf", self.protocolo, self.matricula))
    }

    fn fields(&self) -> ItemFields {
        ItemFields {
            protocolo: Some(self.protocolo.clone()),
            matricula: Some(self.matricula.clone()),
            cnm: None,
            cartorio: Some(self.cartorio.clone()),
            data_pedido: Some(self.data_pedido),
        }
    }
}

/// Rows that parse and fall inside `range`, in table order.
pub fn select_entries(rows: &[Vec<String>], range: &DateRange) -> Vec<ListingEntry> {
    rows.iter()
        .enumerate()
        .filter_map(|(ordinal, cells)| ListingEntry::from_cells(ordinal, cells))
        .filter(|entry| range.contains(entry.data_pedido))
        .collect()
}

/// First `VM` order number in `text`.
pub fn extract_vm_number(text: &str) -> Option<String> {
    VM_NUMBER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// [`SiteDriver`] for `RI_DIGITAL_MATRICULA`.
pub struct RiDigitalDriver {
    launcher: Arc<dyn PortalLauncher<dyn RiDigitalPortal>>,
    storage: StoragePaths,
}

impl RiDigitalDriver {
    pub fn new(launcher: Arc<dyn PortalLauncher<dyn RiDigitalPortal>>, storage: StoragePaths) -> Self {
        Self { launcher, storage }
    }

    async fn drive(
        &self,
        portal: &mut dyn RiDigitalPortal,
        job: &Job,
        credentials: &PortalCredentials,
        payload: &RiDigitalPayload,
        dir: &Path,
        sink: &mut dyn OutcomeSink,
    ) -> Result<DriveSummary, DriverError> {
        portal.login(credentials).await?;
        tracing::debug!(job_id = job.id, "RI Digital login succeeded");

        portal.open_listing().await?;
        let rows = portal.listing_rows().await?;
        let entries = select_entries(&rows, &payload.range);
        tracing::info!(
            job_id = job.id,
            rows = rows.len(),
            matching = entries.len(),
            "RI Digital listing read",
        );

        for (index, entry) in entries.iter().enumerate() {
            let outcome = self.process_entry(portal, job, index, entry, payload, dir).await;
            if let Some(failure) = &outcome.failure {
                tracing::warn!(
                    job_id = job.id,
                    item_index = index,
                    protocolo = %entry.protocolo,
                    kind = failure.kind.as_str(),
                    reason = %failure.reason,
                    "RI Digital item failed",
                );
            }
            sink.accept(outcome).await?;
        }

        Ok(DriveSummary {
            discovered: entries.len(),
        })
    }

    async fn process_entry(
        &self,
        portal: &mut dyn RiDigitalPortal,
        job: &Job,
        index: usize,
        entry: &ListingEntry,
        payload: &RiDigitalPayload,
        dir: &Path,
    ) -> ItemOutcome {
        let mut outcome = ItemOutcome::new(index, entry.fields(), base_metadata(&payload.range));

        if let Err(e) = portal.return_to_listing().await {
            return outcome.with_failure(
                ItemFailureKind::ItemExtractionFailed,
                format!("could not return to listing: {e}"),
            );
        }
        if let Err(e) = portal.open_order(entry).await {
            return outcome.with_failure(
                ItemFailureKind::ItemExtractionFailed,
                format!("could not open order {}: {e}", entry.protocolo),
            );
        }

        match portal.order_text().await {
            Ok(text) => {
                let number = extract_vm_number(&text);
                outcome
                    .metadata
                    .insert("numero_pedido_vm".into(), json!(number));
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, item_index = index, error = %e, "Order text unreadable");
            }
        }

        let dest = dir.join(entry.pdf_filename());
        match portal.download_pdf(&dest).await {
            Ok(()) => outcome.with_artifact(Artifact {
                path: dest,
                document: DocumentSpec {
                    doc_type: DOC_TYPE_RI_DIGITAL_MATRICULA.to_string(),
                    original_filename: entry.pdf_filename(),
                    content_type: CONTENT_TYPE_PDF.to_string(),
                    description: Some(DOCUMENT_DESCRIPTION.to_string()),
                },
            }),
            Err(e) => outcome.with_failure(
                ItemFailureKind::ArtifactUnavailable,
                format!("PDF download failed: {e}"),
            ),
        }
    }
}

fn base_metadata(range: &DateRange) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("fonte".into(), json!(SOURCE));
    metadata.insert("numero_pedido_vm".into(), Value::Null);
    metadata.insert(
        "range".into(),
        json!({
            "data_inicio": range.start.to_string(),
            "data_fim": range.end.to_string(),
        }),
    );
    metadata
}

#[async_trait]
impl SiteDriver for RiDigitalDriver {
    fn job_type(&self) -> &'static str {
        RI_DIGITAL_MATRICULA
    }

    fn credential_provider(&self) -> Option<&'static str> {
        Some(PROVIDER_RI_DIGITAL)
    }

    async fn execute(
        &self,
        job: &Job,
        credentials: Option<&PortalCredentials>,
        sink: &mut dyn OutcomeSink,
    ) -> Result<DriveSummary, DriverError> {
        let payload = RiDigitalPayload::from_value(&job.payload)?;
        let credentials = credentials.filter(|c| c.is_complete()).ok_or_else(|| {
            DriverError::MissingCredentials(format!("no usable {PROVIDER_RI_DIGITAL} credential"))
        })?;

        let dir = self.storage.ri_digital_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let mut portal = self.launcher.launch().await?;
        let result = self
            .drive(portal.as_mut(), job, credentials, &payload, &dir, sink)
            .await;
        release(portal, job.id).await;
        result
    }
}
