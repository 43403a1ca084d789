use geoincra_portals::driver::DriverError;

use crate::stores::StoreError;

/// Job-fatal errors. The display text is stored as the job's
/// `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
