//! Portal credential entity.

use geoincra_core::types::{DbId, Timestamp};
use serde::Deserialize;
use sqlx::FromRow;

/// A row from the `external_credentials` table.
///
/// Not `Serialize`: the secret column must never end up in logs or payloads.
#[derive(Clone, FromRow)]
pub struct Credential {
    pub id: DbId,
    pub user_id: DbId,
    pub provider: String,
    pub login: String,
    /// Sealed (or legacy plaintext) secret; open it with `CredentialCipher`.
    pub password_encrypted: String,
    pub active: bool,
    pub created_at: Timestamp,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("login", &self.login)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// DTO for inserting a credential. Used by tests and seeding only.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCredential {
    pub user_id: DbId,
    pub provider: String,
    pub login: String,
    pub password_encrypted: String,
    pub active: bool,
}
