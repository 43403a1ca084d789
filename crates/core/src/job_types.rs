//! Job type and credential provider catalogue.
//!
//! Job types are free text in `automation_jobs.type`; these constants are the
//! values the worker knows how to drive. Anything else is claimed and failed
//! as unsupported.

// ---------------------------------------------------------------------------
// Job types
// ---------------------------------------------------------------------------

/// Download registry certificate PDFs ("matrículas") from RI Digital.
pub const RI_DIGITAL_MATRICULA: &str = "RI_DIGITAL_MATRICULA";

/// Look up a rural parcel on the ONR / SIG-RI map and fetch its polygon.
pub const ONR_SIGRI_CONSULTA: &str = "ONR_SIGRI_CONSULTA";

/// Every job type with a registered driver.
pub const SUPPORTED_JOB_TYPES: &[&str] = &[RI_DIGITAL_MATRICULA, ONR_SIGRI_CONSULTA];

// ---------------------------------------------------------------------------
// Credential providers
// ---------------------------------------------------------------------------

/// `external_credentials.provider` value for RI Digital logins.
pub const PROVIDER_RI_DIGITAL: &str = "RI_DIGITAL";

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// `documents.doc_type` for a matrícula PDF.
pub const DOC_TYPE_RI_DIGITAL_MATRICULA: &str = "RI_DIGITAL_MATRICULA";

/// `documents.doc_type` for a SIG-RI polygon export.
pub const DOC_TYPE_ONR_SIGRI_POLIGONO: &str = "ONR_SIGRI_POLIGONO";

/// Content type of RI Digital downloads.
pub const CONTENT_TYPE_PDF: &str = "application/pdf";

/// Content type of SIG-RI polygon downloads.
pub const CONTENT_TYPE_KMZ: &str = "application/vnd.google-earth.kmz";

/// Return `true` if `job_type` has a driver.
pub fn is_supported(job_type: &str) -> bool {
    SUPPORTED_JOB_TYPES.contains(&job_type)
}
