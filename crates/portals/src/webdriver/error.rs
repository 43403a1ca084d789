/// Errors from the WebDriver client.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The HTTP request to the WebDriver endpoint failed.
    #[error("WebDriver request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a W3C error object.
    #[error("WebDriver error ({error}): {message}")]
    Protocol { error: String, message: String },

    /// The endpoint answered with something that is not a W3C response.
    #[error("Unexpected WebDriver response: {0}")]
    InvalidResponse(String),

    /// A wait exceeded its deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// No element matched any of the locators tried.
    #[error("Element not found: {0}")]
    NotFound(String),

    /// A download never completed.
    #[error("Download failed: {0}")]
    Download(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was already closed.
    #[error("Browser session is closed")]
    Closed,
}

impl BrowserError {
    /// W3C errors that mean "nothing matched (anymore)"; waits keep polling
    /// on these instead of failing.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Protocol { error, .. } => matches!(
                error.as_str(),
                "no such element"
                    | "stale element reference"
                    | "element not interactable"
                    | "element click intercepted"
            ),
            _ => false,
        }
    }
}
