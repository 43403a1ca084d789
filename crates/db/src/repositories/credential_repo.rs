//! Repository for the `external_credentials` table.

use geoincra_core::types::DbId;
use sqlx::PgPool;

use crate::models::credential::{Credential, NewCredential};

/// Column list for `external_credentials` queries.
const COLUMNS: &str = "id, user_id, provider, login, password_encrypted, active, created_at";

/// Read access to portal credentials.
pub struct CredentialRepo;

impl CredentialRepo {
    /// Find the active credential of `user_id` for `provider`.
    ///
    /// One active row per (user, provider) is expected; if several exist the
    /// most recently created wins.
    pub async fn find_active(
        pool: &PgPool,
        user_id: DbId,
        provider: &str,
    ) -> Result<Option<Credential>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM external_credentials \
             WHERE user_id = $1 AND provider = $2 AND active = TRUE \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Credential>(&query)
            .bind(user_id)
            .bind(provider)
            .fetch_optional(pool)
            .await
    }

    /// Insert a credential row. The backend owns this table; the worker only
    /// writes to it when seeding tests.
    pub async fn create(pool: &PgPool, input: &NewCredential) -> Result<Credential, sqlx::Error> {
        let query = format!(
            "INSERT INTO external_credentials (user_id, provider, login, password_encrypted, active) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Credential>(&query)
            .bind(input.user_id)
            .bind(&input.provider)
            .bind(&input.login)
            .bind(&input.password_encrypted)
            .bind(input.active)
            .fetch_one(pool)
            .await
    }
}
