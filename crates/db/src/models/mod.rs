//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row and, where the worker writes rows, an insert DTO.

pub mod credential;
pub mod document;
pub mod job;
pub mod result;
pub mod status;
