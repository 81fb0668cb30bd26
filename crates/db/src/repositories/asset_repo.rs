//! Repository for the `assets` table.

use pix360_core::asset::AssetData;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::asset::Asset;
use crate::repositories::conversion_repo::ACTIVE_STATUSES;

/// Column list for `assets` queries.
const COLUMNS: &str = "\
    id, conversion_id, content, mime_type, checksum_sha256, \
    is_result, created_at";

/// Provides storage for conversion assets.
pub struct AssetRepo;

impl AssetRepo {
    /// Store a payload for a conversion, computing its checksum.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        conversion_id: Uuid,
        data: &AssetData,
        is_result: bool,
    ) -> Result<Asset, sqlx::Error> {
        let query = format!(
            "INSERT INTO assets \
                 (id, conversion_id, content, mime_type, checksum_sha256, is_result) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Asset>(&query)
            .bind(Uuid::new_v4())
            .bind(conversion_id)
            .bind(&data.bytes)
            .bind(&data.mime_type)
            .bind(data.checksum())
            .bind(is_result)
            .fetch_one(executor)
            .await
    }

    /// Store an intermediate payload, but only while the conversion is
    /// still being worked on. Returns `None` when it is not.
    pub async fn insert_if_active(
        pool: &PgPool,
        conversion_id: Uuid,
        data: &AssetData,
    ) -> Result<Option<Asset>, sqlx::Error> {
        let query = format!(
            "INSERT INTO assets \
                 (id, conversion_id, content, mime_type, checksum_sha256, is_result) \
             SELECT $1::uuid, $2::uuid, $3::bytea, $4::text, $5::text, FALSE \
             WHERE EXISTS ( \
                 SELECT 1 FROM conversions WHERE id = $2 AND status_id = ANY($6) \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Asset>(&query)
            .bind(Uuid::new_v4())
            .bind(conversion_id)
            .bind(&data.bytes)
            .bind(&data.mime_type)
            .bind(data.checksum())
            .bind(&ACTIVE_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// All assets of a conversion, oldest first.
    pub async fn list_for_conversion(
        pool: &PgPool,
        conversion_id: Uuid,
    ) -> Result<Vec<Asset>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM assets \
             WHERE conversion_id = $1 \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Asset>(&query)
            .bind(conversion_id)
            .fetch_all(pool)
            .await
    }
}
