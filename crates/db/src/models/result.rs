//! Automation result entity and insert DTO.

use chrono::NaiveDate;
use geoincra_core::types::DbId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `automation_results` table. Never updated after insert.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AutomationResult {
    pub id: DbId,
    pub job_id: DbId,
    pub protocolo: Option<String>,
    pub matricula: Option<String>,
    pub cnm: Option<String>,
    pub cartorio: Option<String>,
    pub data_pedido: Option<NaiveDate>,
    pub file_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// DTO for inserting a result. Every field except the job is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct NewAutomationResult {
    pub protocolo: Option<String>,
    pub matricula: Option<String>,
    pub cnm: Option<String>,
    pub cartorio: Option<String>,
    pub data_pedido: Option<NaiveDate>,
    pub file_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
}
