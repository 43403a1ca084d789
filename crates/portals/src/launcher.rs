//! Scoped portal sessions.
//!
//! Drivers acquire a portal through a [`PortalLauncher`] at the start of a
//! job and hand it back through [`release`] on every exit path, so the
//! underlying browser is closed after success, login failure and item
//! errors alike.

use async_trait::async_trait;

use crate::webdriver::BrowserError;

/// Base trait of every portal: something that holds a browser and must be
/// closed.
#[async_trait]
pub trait Portal: Send {
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Opens a fresh portal session of type `P` for one job.
#[async_trait]
pub trait PortalLauncher<P: ?Sized + Send>: Send + Sync {
    async fn launch(&self) -> Result<Box<P>, BrowserError>;
}

/// Close `portal`, logging (not propagating) a close failure.
///
/// A close failure never changes the job outcome.
pub async fn release<P: Portal + ?Sized>(mut portal: Box<P>, job_id: i64) {
    if let Err(e) = portal.close().await {
        tracing::warn!(job_id, error = %e, "Failed to close browser session");
    }
}
