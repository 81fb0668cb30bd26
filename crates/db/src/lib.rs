//! Pix360 persistence: conversion and asset models, the store contract the
//! worker runs against, and its PostgreSQL and in-memory implementations.
//!
//! The schema itself is owned by the web application; this crate only
//! issues runtime queries against it.

pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;
pub mod store;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use memory::MemoryConversionStore;
pub use pg::PgConversionStore;
pub use store::{ConversionStore, StoreError};

/// Maximum pool size. The worker processes one job at a time.
const MAX_CONNECTIONS: u32 = 5;

/// Open a connection pool to `database_url`.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
