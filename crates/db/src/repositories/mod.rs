//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod credential_repo;
pub mod document_repo;
pub mod job_repo;
pub mod result_repo;

pub use credential_repo::CredentialRepo;
pub use document_repo::DocumentRepo;
pub use job_repo::JobRepo;
pub use result_repo::ResultRepo;
