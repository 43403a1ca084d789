//! Repository for the append-only `automation_results` table.

use geoincra_core::types::DbId;
use sqlx::PgPool;

use crate::models::result::{AutomationResult, NewAutomationResult};

/// Column list for `automation_results` queries.
const COLUMNS: &str =
    "id, job_id, protocolo, matricula, cnm, cartorio, data_pedido, file_path, metadata";

/// Insert and read automation results. There is no update or delete.
pub struct ResultRepo;

impl ResultRepo {
    /// Insert one result row for `job_id`, returning its ID.
    ///
    /// All data columns are nullable; a failure-marker row is simply one
    /// without `file_path` and with the reason in `metadata`.
    pub async fn insert(
        pool: &PgPool,
        job_id: DbId,
        input: &NewAutomationResult,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO automation_results \
                 (job_id, protocolo, matricula, cnm, cartorio, data_pedido, file_path, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(job_id)
        .bind(&input.protocolo)
        .bind(&input.matricula)
        .bind(&input.cnm)
        .bind(&input.cartorio)
        .bind(input.data_pedido)
        .bind(&input.file_path)
        .bind(&input.metadata)
        .fetch_one(pool)
        .await
    }

    /// List the results of a job in insertion order.
    pub async fn list_by_job(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Vec<AutomationResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM automation_results WHERE job_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, AutomationResult>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
