//! Job type → site driver lookup.

use std::collections::HashMap;
use std::sync::Arc;

use geoincra_portals::driver::SiteDriver;
use geoincra_portals::onr_sigri::OnrSigriDriver;
use geoincra_portals::ri_digital::RiDigitalDriver;
use geoincra_portals::webdriver::{
    BrowserError, SessionOptions, WebDriverClient, WebDriverConfig, WebDriverLauncher,
};

use crate::config::WorkerConfig;

/// Drivers keyed by the job type they handle.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, Arc<dyn SiteDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production drivers wired to the configured WebDriver endpoint.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, BrowserError> {
        let mut webdriver = WebDriverConfig::new(&config.webdriver_url, config.download_root());
        webdriver.page_timeout = config.browser_timeout;
        let client = WebDriverClient::new(webdriver)?;

        let ri_launcher = WebDriverLauncher::new(client.clone());
        let onr_launcher = WebDriverLauncher::new(client).with_options(SessionOptions {
            profile_dir: config.onr_browser_profile.clone(),
        });

        let mut registry = Self::new();
        registry.register(Arc::new(RiDigitalDriver::new(
            Arc::new(ri_launcher),
            config.storage.clone(),
        )));
        registry.register(Arc::new(OnrSigriDriver::new(
            Arc::new(onr_launcher),
            config.storage.clone(),
            config.onr_certificate.clone(),
        )));
        Ok(registry)
    }

    /// Add `driver` under its job type, replacing any previous one.
    pub fn register(&mut self, driver: Arc<dyn SiteDriver>) {
        self.drivers.insert(driver.job_type(), driver);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn SiteDriver>> {
        self.drivers.get(job_type).cloned()
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.drivers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
