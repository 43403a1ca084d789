//! A live browser session and the commands the portal pages use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::error::BrowserError;
use super::locator::Locator;

/// W3C web element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Interval between polls in the `wait_*` helpers.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Interval between download-directory scans.
const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Script timeout applied at session start.
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// WebDriver key code for Enter.
const KEY_ENTER: &str = "\u{E007}";

/// Suffixes Chrome uses for in-progress downloads.
const PARTIAL_SUFFIXES: &[&str] = &[".crdownload", ".tmp", ".part"];

/// Handle to a DOM element within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    id: String,
}

impl Element {
    fn reference(&self) -> Value {
        json!({ ELEMENT_KEY: self.id })
    }

    fn from_value(value: &Value) -> Result<Self, BrowserError> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| Self { id: id.to_string() })
            .ok_or_else(|| BrowserError::InvalidResponse(format!("not an element reference: {value}")))
    }
}

/// One browser session. Must be [`close`](Self::close)d; dropping an open
/// session leaves the browser running on the WebDriver host.
#[derive(Debug)]
pub struct Session {
    http: reqwest::Client,
    base: String,
    id: String,
    download_dir: PathBuf,
    /// Session-private copy of the browser profile, removed on close.
    profile_copy: Option<PathBuf>,
    page_timeout: Duration,
    element_wait: Duration,
    closed: bool,
}

impl Session {
    pub(crate) fn new(
        http: reqwest::Client,
        endpoint: &str,
        id: String,
        download_dir: PathBuf,
        page_timeout: Duration,
        element_wait: Duration,
    ) -> Self {
        let base = format!("{}/session/{id}", endpoint.trim_end_matches('/'));
        Self {
            http,
            base,
            id,
            download_dir,
            profile_copy: None,
            page_timeout,
            element_wait,
            closed: false,
        }
    }

    pub(crate) fn with_profile_copy(mut self, dir: Option<PathBuf>) -> Self {
        self.profile_copy = dir;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }

    pub fn element_wait(&self) -> Duration {
        self.element_wait
    }

    /// Apply timeouts and (best-effort) allow downloads in headless mode.
    pub(crate) async fn configure(&self) -> Result<(), BrowserError> {
        self.command(
            Method::POST,
            "/timeouts",
            Some(json!({
                "implicit": 0,
                "pageLoad": self.page_timeout.as_millis() as u64,
                "script": SCRIPT_TIMEOUT.as_millis() as u64,
            })),
        )
        .await?;

        let cdp = json!({
            "cmd": "Browser.setDownloadBehavior",
            "params": {
                "behavior": "allow",
                "downloadPath": self.download_dir.display().to_string(),
            },
        });
        if let Err(e) = self.command(Method::POST, "/goog/cdp/execute", Some(cdp)).await {
            tracing::debug!(session_id = %self.id, error = %e, "CDP download behaviour not applied");
        }
        Ok(())
    }

    // ---- navigation ----

    pub async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    pub async fn current_url(&self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse(format!("url is not a string: {value}")))
    }

    /// Poll until the current URL contains `fragment`.
    pub async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<String, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let url = self.current_url().await?;
            if url.contains(fragment) {
                return Ok(url);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "url containing `{fragment}` (last: {url})"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    // ---- lookup ----

    pub async fn find_all(&self, locator: &Locator) -> Result<Vec<Element>, BrowserError> {
        let value = self
            .command(Method::POST, "/elements", Some(Self::find_body(locator)))
            .await?;
        Self::elements(value)
    }

    pub async fn find_within(
        &self,
        parent: &Element,
        locator: &Locator,
    ) -> Result<Vec<Element>, BrowserError> {
        let value = self
            .command(
                Method::POST,
                &format!("/element/{}/elements", parent.id),
                Some(Self::find_body(locator)),
            )
            .await?;
        Self::elements(value)
    }

    /// Wait for the first displayed element matching `locator`.
    pub async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<Element, BrowserError> {
        self.wait_for_any(std::slice::from_ref(locator), timeout)
            .await
            .map(|(_, element)| element)
    }

    /// Wait until one of `locators` matches a displayed element.
    ///
    /// Locators are tried in order on every poll, so an earlier locator
    /// wins when several match. Returns the index of the winning locator.
    pub async fn wait_for_any(
        &self,
        locators: &[Locator],
        timeout: Duration,
    ) -> Result<(usize, Element), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            for (idx, locator) in locators.iter().enumerate() {
                match self.first_displayed(locator).await {
                    Ok(Some(element)) => return Ok((idx, element)),
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {}
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                let tried: Vec<String> = locators.iter().map(ToString::to_string).collect();
                return Err(BrowserError::Timeout(tried.join(" | ")));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn first_displayed(&self, locator: &Locator) -> Result<Option<Element>, BrowserError> {
        for element in self.find_all(locator).await? {
            if self.is_displayed(&element).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    pub async fn is_displayed(&self, element: &Element) -> Result<bool, BrowserError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/displayed", element.id), None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    // ---- interaction ----

    pub async fn click(&self, element: &Element) -> Result<(), BrowserError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.id),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    /// Click, falling back to a script click when the element is covered
    /// or not interactable.
    pub async fn click_or_force(&self, element: &Element) -> Result<(), BrowserError> {
        match self.click(element).await {
            Err(e) if e.is_transient() => self.force_click(element).await,
            other => other,
        }
    }

    /// Click through script, bypassing overlays that intercept pointer events.
    pub async fn force_click(&self, element: &Element) -> Result<(), BrowserError> {
        self.execute("arguments[0].click();", vec![element.reference()])
            .await
            .map(|_| ())
    }

    /// Clear `element` and type `text` into it.
    pub async fn fill(&self, element: &Element, text: &str) -> Result<(), BrowserError> {
        self.command(
            Method::POST,
            &format!("/element/{}/clear", element.id),
            Some(json!({})),
        )
        .await?;
        self.send_keys(element, text).await
    }

    pub async fn press_enter(&self, element: &Element) -> Result<(), BrowserError> {
        self.send_keys(element, KEY_ENTER).await
    }

    async fn send_keys(&self, element: &Element, text: &str) -> Result<(), BrowserError> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.id),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    /// Press and release the primary button at the centre of `element`.
    pub async fn click_centre(&self, element: &Element) -> Result<(), BrowserError> {
        let actions = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": { "pointerType": "mouse" },
                "actions": [
                    { "type": "pointerMove", "origin": element.reference(), "x": 0, "y": 0 },
                    { "type": "pointerDown", "button": 0 },
                    { "type": "pointerUp", "button": 0 },
                ],
            }],
        });
        self.command(Method::POST, "/actions", Some(actions)).await?;
        self.command(Method::DELETE, "/actions", None).await.map(|_| ())
    }

    pub async fn text(&self, element: &Element) -> Result<String, BrowserError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.id), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>, BrowserError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{name}", element.id),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Visible text of the whole page.
    pub async fn body_text(&self) -> Result<String, BrowserError> {
        let body = self.wait_for(&Locator::css("body"), self.element_wait).await?;
        self.text(&body).await
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    // ---- downloads ----

    /// Files currently present in the download directory.
    pub async fn download_snapshot(&self) -> Result<HashSet<PathBuf>, BrowserError> {
        let mut seen = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            seen.insert(entry.path());
        }
        Ok(seen)
    }

    /// Remove every entry left in the download directory, partial
    /// downloads included, so the next snapshot starts empty.
    pub async fn clear_downloads(&self) -> Result<(), BrowserError> {
        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let removed = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Clear leftovers, then snapshot the (now empty) download directory.
    ///
    /// Call right before the click that starts a download and pass the
    /// result to [`wait_for_download`](Self::wait_for_download).
    pub async fn prepare_download(&self) -> Result<HashSet<PathBuf>, BrowserError> {
        self.clear_downloads().await?;
        self.download_snapshot().await
    }

    /// Wait for a completed file that was not in `before`.
    ///
    /// A file counts as complete once it has no partial-download suffix
    /// and its size is unchanged across two scans. A file whose partial
    /// form was already in `before` belongs to an earlier download and is
    /// never returned.
    pub async fn wait_for_download(
        &self,
        before: &HashSet<PathBuf>,
        timeout: Duration,
    ) -> Result<PathBuf, BrowserError> {
        let deadline = Instant::now() + timeout;
        let mut candidate: Option<(PathBuf, u64)> = None;
        loop {
            let mut fresh = None;
            let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if before.contains(&path) || is_partial(&path) || finished_earlier(before, &path) {
                    continue;
                }
                let len = entry.metadata().await?.len();
                fresh = Some((path, len));
                break;
            }

            if let (Some(prev), Some(now)) = (&candidate, &fresh) {
                if prev == now && now.1 > 0 {
                    return Ok(now.0.clone());
                }
            }
            candidate = fresh;

            if Instant::now() >= deadline {
                return Err(BrowserError::Download(format!(
                    "no completed file in {} after {}s",
                    self.download_dir.display(),
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(DOWNLOAD_POLL_INTERVAL).await;
        }
    }

    // ---- lifecycle ----

    /// End the session and remove its download directory and profile
    /// copy. Idempotent.
    pub async fn close(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await.map(|_| ());
        self.closed = true;

        for dir in std::iter::once(&self.download_dir).chain(self.profile_copy.as_ref()) {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                tracing::debug!(
                    session_id = %self.id,
                    dir = %dir.display(),
                    error = %e,
                    "Could not remove session directory",
                );
            }
        }
        tracing::debug!(session_id = %self.id, "Browser session closed");
        result
    }

    // ---- private helpers ----

    fn find_body(locator: &Locator) -> Value {
        json!({ "using": locator.strategy(), "value": locator.value() })
    }

    fn elements(value: Value) -> Result<Vec<Element>, BrowserError> {
        match value {
            Value::Array(items) => items.iter().map(Element::from_value).collect(),
            other => Err(BrowserError::InvalidResponse(format!(
                "expected element list, got {other}"
            ))),
        }
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        if self.closed {
            return Err(BrowserError::Closed);
        }
        let mut request = self.http.request(method, format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        unwrap_value(request.send().await?).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(session_id = %self.id, "Browser session dropped without close");
        }
    }
}

/// Move a finished download to its final location.
///
/// Falls back to copy-and-delete when the download root and the target
/// live on different filesystems.
pub async fn move_download(from: &Path, to: &Path) -> Result<(), BrowserError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

fn is_partial(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Whether `path` is the completed form of a partial download in `before`.
fn finished_earlier(before: &HashSet<PathBuf>, path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return false;
    };
    PARTIAL_SUFFIXES
        .iter()
        .any(|suffix| before.contains(&path.with_file_name(format!("{name}{suffix}"))))
}

/// Extract `value` from a W3C response, mapping error objects to
/// [`BrowserError::Protocol`].
pub(crate) async fn unwrap_value(response: reqwest::Response) -> Result<Value, BrowserError> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text).map_err(|_| {
        BrowserError::InvalidResponse(format!("HTTP {status}: {}", truncate(&text, 200)))
    })?;
    parse_value(status, body)
}

fn parse_value(status: reqwest::StatusCode, body: Value) -> Result<Value, BrowserError> {
    let value = match body {
        Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
        other => {
            return Err(BrowserError::InvalidResponse(format!(
                "HTTP {status}: body is not an object: {other}"
            )))
        }
    };
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(BrowserError::Protocol {
            error: error.to_string(),
            message,
        });
    }
    if !status.is_success() {
        return Err(BrowserError::InvalidResponse(format!("HTTP {status} without error object")));
    }
    Ok(value)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use reqwest::StatusCode;

    #[test]
    fn success_value_is_unwrapped() {
        let value = parse_value(StatusCode::OK, json!({"value": "https://ridigital.org.br/"})).unwrap();
        assert_eq!(value, "https://ridigital.org.br/");
        assert_eq!(parse_value(StatusCode::OK, json!({"value": null})).unwrap(), Value::Null);
    }

    #[test]
    fn error_object_becomes_protocol_error() {
        let err = parse_value(
            StatusCode::NOT_FOUND,
            json!({"value": {"error": "no such element", "message": "Unable to locate", "stacktrace": ""}}),
        )
        .unwrap_err();
        assert_matches!(&err, BrowserError::Protocol { error, .. } if error == "no such element");
        assert!(err.is_transient());
    }

    #[test]
    fn session_errors_are_not_transient() {
        let err = parse_value(
            StatusCode::NOT_FOUND,
            json!({"value": {"error": "invalid session id", "message": "gone"}}),
        )
        .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn element_lists_are_parsed() {
        let list = Session::elements(json!([{ ELEMENT_KEY: "a" }, { ELEMENT_KEY: "b" }])).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, "b");
        assert!(Session::elements(json!({"x": 1})).is_err());
        assert!(Session::elements(json!([{"x": 1}])).is_err());
    }

    #[test]
    fn partial_downloads_are_ignored() {
        assert!(is_partial(Path::new("/d/file.pdf.crdownload")));
        assert!(is_partial(Path::new("/d/.com.google.Chrome.abc")));
        assert!(!is_partial(Path::new("/d/matricula.pdf")));
    }

    #[tokio::test]
    async fn download_wait_picks_new_stable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.pdf"), b"old").unwrap();

        let mut session = Session::new(
            reqwest::Client::new(),
            "http://localhost:9515",
            "test".into(),
            dir.path().to_path_buf(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );
        let before = session.download_snapshot().await.unwrap();
        std::fs::write(dir.path().join("new.pdf.crdownload"), b"partial").unwrap();
        std::fs::write(dir.path().join("new.pdf"), b"%PDF-1.4").unwrap();

        let path = session
            .wait_for_download(&before, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("new.pdf"));

        // Not a real session; skip the DELETE round trip.
        session.closed = true;
    }

    fn offline_session(dir: &Path) -> Session {
        Session::new(
            reqwest::Client::new(),
            "http://localhost:9515",
            "test".into(),
            dir.to_path_buf(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn earlier_partial_finishing_after_snapshot_is_not_taken() {
        let dir = tempfile::tempdir().unwrap();
        // A slow download from the previous item is still in flight.
        std::fs::write(dir.path().join("item1.pdf.crdownload"), b"%PDF-1.4 part").unwrap();

        let mut session = offline_session(dir.path());
        let before = session.download_snapshot().await.unwrap();
        std::fs::rename(
            dir.path().join("item1.pdf.crdownload"),
            dir.path().join("item1.pdf"),
        )
        .unwrap();

        let err = session
            .wait_for_download(&before, Duration::from_millis(1200))
            .await
            .unwrap_err();
        assert_matches!(err, BrowserError::Download(_));
        session.closed = true;
    }

    #[tokio::test]
    async fn prepared_download_ignores_leftovers_and_takes_the_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("item1.pdf.crdownload"), b"part").unwrap();
        std::fs::write(dir.path().join("item0.pdf"), b"%PDF-1.4 old").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let mut session = offline_session(dir.path());
        let before = session.prepare_download().await.unwrap();
        assert!(before.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        std::fs::write(dir.path().join("item2.pdf"), b"%PDF-1.4 new").unwrap();
        let path = session
            .wait_for_download(&before, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("item2.pdf"));
        session.closed = true;
    }

    #[tokio::test]
    async fn move_download_creates_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("dl").join("x.kmz");
        std::fs::create_dir_all(from.parent().unwrap()).unwrap();
        std::fs::write(&from, b"PK").unwrap();

        let to = dir.path().join("onr-sigri").join("x.kmz");
        move_download(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"PK");
    }

    #[tokio::test]
    async fn download_wait_times_out_without_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            reqwest::Client::new(),
            "http://localhost:9515",
            "test".into(),
            dir.path().to_path_buf(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );
        let before = session.download_snapshot().await.unwrap();
        let err = session
            .wait_for_download(&before, Duration::from_millis(600))
            .await
            .unwrap_err();
        assert_matches!(err, BrowserError::Download(_));
        session.closed = true;
    }
}
