#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
