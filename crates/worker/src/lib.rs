//! Registry automation worker.
//!
//! Claims `automation_jobs` rows, runs the matching site driver and
//! persists one `automation_results` row per discovered item. The binary in
//! `main.rs` wires configuration, the database pool and the WebDriver
//! backend into a [`dispatcher::Dispatcher`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod persist;
pub mod registry;
pub mod stores;
