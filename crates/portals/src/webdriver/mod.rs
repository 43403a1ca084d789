//! Minimal W3C WebDriver client.
//!
//! Speaks the JSON wire protocol over [`reqwest`] to a chromedriver
//! compatible endpoint. Only the commands the portal pages need are
//! implemented: navigation, element lookup by CSS/XPath, clicks, typing,
//! script execution, pointer actions and download-directory polling.

mod client;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod locator;
mod session;

pub use client::{SessionOptions, WebDriverClient, WebDriverConfig, WebDriverLauncher};
pub use error::BrowserError;
pub use locator::{xpath_literal, Locator};
pub use session::{move_download, Element, Session};
