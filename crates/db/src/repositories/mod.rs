//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept a `&PgPool` (or any Postgres executor, where the call also runs
//! inside a transaction) as the first argument.

pub mod asset_repo;
pub mod conversion_repo;

pub use asset_repo::AssetRepo;
pub use conversion_repo::ConversionRepo;
