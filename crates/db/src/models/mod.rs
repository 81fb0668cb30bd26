//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, and a `Deserialize` create DTO where rows are inserted
//! from outside the worker.

pub mod asset;
pub mod conversion;
pub mod status;
