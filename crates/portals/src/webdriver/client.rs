//! WebDriver endpoint configuration and session creation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};

use super::error::BrowserError;
use super::session::{self, Session};

/// Default page-load and download timeout.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default wait for an element to appear.
pub const DEFAULT_ELEMENT_WAIT: Duration = Duration::from_secs(20);

/// Connection settings for the WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Base URL of the endpoint, e.g. `http://localhost:9515`.
    pub url: String,
    /// Page-load and download timeout.
    pub page_timeout: Duration,
    /// How long element lookups poll before giving up.
    pub element_wait: Duration,
    /// Parent of the per-session download directories. Must be visible
    /// to both this process and the browser.
    pub download_root: PathBuf,
    pub headless: bool,
}

impl WebDriverConfig {
    pub fn new(url: impl Into<String>, download_root: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            element_wait: DEFAULT_ELEMENT_WAIT,
            download_root: download_root.into(),
            headless: true,
        }
    }
}

/// Per-session browser options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Chrome user-data directory to start from, e.g. one holding an
    /// imported client certificate. Each session runs on its own copy under
    /// the download root; the directory itself is only read.
    pub profile_dir: Option<PathBuf>,
}

/// Creates browser sessions against one WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    config: WebDriverConfig,
}

impl WebDriverClient {
    pub fn new(config: WebDriverConfig) -> Result<Self, BrowserError> {
        // Requests themselves must outlive the page-load timeout, which the
        // browser enforces on navigation commands.
        let http = reqwest::Client::builder()
            .timeout(config.page_timeout + Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WebDriverConfig {
        &self.config
    }

    /// Start a new headless Chrome session with its own download directory.
    ///
    /// A configured profile is copied per session. On any failure the remote
    /// session is deleted and the session directories are removed.
    pub async fn new_session(&self, options: &SessionOptions) -> Result<Session, BrowserError> {
        let scratch = uuid::Uuid::new_v4().to_string();
        let download_dir = self.config.download_root.join(&scratch);
        tokio::fs::create_dir_all(&download_dir).await?;

        let profile_copy = match &options.profile_dir {
            Some(profile) => {
                let copy = self.config.download_root.join(format!("{scratch}.profile"));
                if let Err(e) = copy_profile(profile, &copy).await {
                    discard(&[download_dir.as_path(), copy.as_path()]).await;
                    return Err(e);
                }
                Some(copy)
            }
            None => None,
        };

        let session_id = match self.create_remote(&download_dir, profile_copy.as_deref()).await {
            Ok(id) => id,
            Err(e) => {
                let mut dirs = vec![download_dir.as_path()];
                dirs.extend(profile_copy.as_deref());
                discard(&dirs).await;
                return Err(e);
            }
        };

        tracing::debug!(
            session_id = %session_id,
            download_dir = %download_dir.display(),
            "Browser session started",
        );

        let mut session = Session::new(
            self.http.clone(),
            &self.config.url,
            session_id,
            download_dir,
            self.config.page_timeout,
            self.config.element_wait,
        )
        .with_profile_copy(profile_copy);

        if let Err(e) = session.configure().await {
            if let Err(close_err) = session.close().await {
                tracing::warn!(
                    session_id = %session.id(),
                    error = %close_err,
                    "Failed to close unconfigured browser session",
                );
            }
            return Err(e);
        }
        Ok(session)
    }

    /// `POST /session`; returns the new session id.
    async fn create_remote(
        &self,
        download_dir: &Path,
        profile: Option<&Path>,
    ) -> Result<String, BrowserError> {
        let body = json!({ "capabilities": { "alwaysMatch": self.capabilities(download_dir, profile) } });
        let response = self
            .http
            .post(format!("{}/session", self.config.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await?;
        let value = session::unwrap_value(response).await?;

        value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse("new session without sessionId".into()))
    }

    fn capabilities(&self, download_dir: &Path, profile: Option<&Path>) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--window-size=1600,900".to_string(),
        ];
        if self.config.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(profile) = profile {
            args.push(format!("--user-data-dir={}", profile.display()));
        }

        json!({
            "browserName": "chrome",
            "acceptInsecureCerts": false,
            "goog:chromeOptions": {
                "args": args,
                "prefs": {
                    "download.default_directory": download_dir.display().to_string(),
                    "download.prompt_for_download": false,
                    "download.directory_upgrade": true,
                    "plugins.always_open_pdf_externally": true,
                    "safebrowsing.enabled": true,
                },
            },
        })
    }
}

/// Copy a Chrome user-data directory, leaving out its singleton locks.
async fn copy_profile(from: &Path, to: &Path) -> Result<(), BrowserError> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if is_profile_lock(&name.to_string_lossy()) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), dst.join(&name)));
            } else if file_type.is_file() {
                tokio::fs::copy(entry.path(), dst.join(&name)).await?;
            }
        }
    }
    Ok(())
}

fn is_profile_lock(name: &str) -> bool {
    name.starts_with("Singleton") || name == "lockfile"
}

async fn discard(dirs: &[&Path]) {
    for dir in dirs {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            tracing::debug!(dir = %dir.display(), error = %e, "Could not remove session directory");
        }
    }
}

/// Launches portal sessions backed by a [`WebDriverClient`].
///
/// Implements [`crate::launcher::PortalLauncher`] for each portal trait.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    pub(crate) client: WebDriverClient,
    pub(crate) options: SessionOptions,
}

impl WebDriverLauncher {
    pub fn new(client: WebDriverClient) -> Self {
        Self {
            client,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) async fn start(&self) -> Result<Session, BrowserError> {
        self.client.new_session(&self.options).await
    }
}
