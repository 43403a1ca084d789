//! Domain primitives shared by the automation worker crates.
//!
//! Everything here is pure (no database, no browser, no network) so it can
//! be unit tested in isolation and reused by the store, driver and worker
//! layers alike.

pub mod credentials;
pub mod dates;
pub mod error;
pub mod hashing;
pub mod job_types;
pub mod storage;
pub mod types;
