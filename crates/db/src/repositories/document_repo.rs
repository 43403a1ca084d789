//! Repository for the `documents` table.

use geoincra_core::types::DbId;
use sqlx::PgPool;

use crate::models::document::{Document, NewDocument};

/// Column list for `documents` queries.
const COLUMNS: &str = "\
    id, project_id, doc_type, stored_filename, original_filename, \
    content_type, description, file_path, uploaded_at";

/// Registers retrieved files as project documents.
pub struct DocumentRepo;

impl DocumentRepo {
    /// Insert a document for `project_id`, returning the created row.
    pub async fn create(
        pool: &PgPool,
        project_id: DbId,
        input: &NewDocument,
    ) -> Result<Document, sqlx::Error> {
        let query = format!(
            "INSERT INTO documents \
                 (project_id, doc_type, stored_filename, original_filename, \
                  content_type, description, file_path, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Document>(&query)
            .bind(project_id)
            .bind(&input.doc_type)
            .bind(&input.stored_filename)
            .bind(&input.original_filename)
            .bind(&input.content_type)
            .bind(&input.description)
            .bind(&input.file_path)
            .fetch_one(pool)
            .await
    }

    /// Register a document when the job belongs to a project.
    ///
    /// Returns `None` without touching the database when `project_id` is
    /// absent; registration is optional, result persistence is not.
    pub async fn register(
        pool: &PgPool,
        project_id: Option<DbId>,
        input: &NewDocument,
    ) -> Result<Option<DbId>, sqlx::Error> {
        let Some(project_id) = project_id else {
            return Ok(None);
        };
        let document = Self::create(pool, project_id, input).await?;
        Ok(Some(document.id))
    }

    /// Find a document by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Document>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM documents WHERE id = $1");
        sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
