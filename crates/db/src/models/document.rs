//! Project document entity and registration descriptor.

use geoincra_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `documents` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Document {
    pub id: DbId,
    pub project_id: DbId,
    pub doc_type: String,
    pub stored_filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub description: Option<String>,
    /// Backend-visible path of the stored file.
    pub file_path: String,
    pub uploaded_at: Timestamp,
}

/// Everything needed to register a retrieved file as a project document.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NewDocument {
    pub doc_type: String,
    pub stored_filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub description: Option<String>,
    pub file_path: String,
}
