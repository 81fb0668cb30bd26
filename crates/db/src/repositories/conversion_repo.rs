//! Repository for the `conversions` table.
//!
//! Status changes are compare-and-set: every update names the status the
//! row must currently have, and reports `None` when it did not match.

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::conversion::{Conversion, CreateConversion};
use crate::models::status::{ConversionStatus, StatusId};

/// Column list for `conversions` queries.
const COLUMNS: &str = "\
    id, url, title, downloader, properties, status_id, log, \
    user_id, retry_of, created_at, updated_at";

/// Non-terminal statuses, the ones a user may still dismiss.
const OPEN_STATUSES: [StatusId; 4] = [
    ConversionStatus::Pending as StatusId,
    ConversionStatus::Processing as StatusId,
    ConversionStatus::Downloading as StatusId,
    ConversionStatus::Stitching as StatusId,
];

/// Statuses a worker may fail a job from.
pub(crate) const ACTIVE_STATUSES: [StatusId; 3] = [
    ConversionStatus::Processing as StatusId,
    ConversionStatus::Downloading as StatusId,
    ConversionStatus::Stitching as StatusId,
];

/// Provides queue and lifecycle operations for conversions.
pub struct ConversionRepo;

impl ConversionRepo {
    /// Insert a new Pending conversion.
    pub async fn create(
        pool: &PgPool,
        input: &CreateConversion,
        retry_of: Option<Uuid>,
    ) -> Result<Conversion, sqlx::Error> {
        let query = format!(
            "INSERT INTO conversions \
                 (id, url, title, downloader, properties, status_id, user_id, retry_of) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(Uuid::new_v4())
            .bind(&input.url)
            .bind(input.title.as_deref())
            .bind(input.downloader.as_deref())
            .bind(input.properties_or_empty())
            .bind(ConversionStatus::Pending.id())
            .bind(input.user_id)
            .bind(retry_of)
            .fetch_one(pool)
            .await
    }

    /// Find a conversion by its ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Conversion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM conversions WHERE id = $1");
        sqlx::query_as::<_, Conversion>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the oldest Pending conversion.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent claimers never
    /// receive the same row.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Conversion>, sqlx::Error> {
        let query = format!(
            "UPDATE conversions \
             SET status_id = $1, updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM conversions \
                 WHERE status_id = $2 \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(ConversionStatus::Processing.id())
            .bind(ConversionStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Move a conversion from `from` to `to` if it is still in `from`.
    pub async fn update_status<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        from: ConversionStatus,
        to: ConversionStatus,
    ) -> Result<Option<Conversion>, sqlx::Error> {
        let query = format!(
            "UPDATE conversions \
             SET status_id = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(id)
            .bind(from.id())
            .bind(to.id())
            .fetch_optional(executor)
            .await
    }

    /// Persist the downloader chosen for a conversion.
    pub async fn set_downloader(
        pool: &PgPool,
        id: Uuid,
        identifier: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE conversions SET downloader = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(identifier)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark an active conversion as failed and store its log.
    pub async fn fail(
        pool: &PgPool,
        id: Uuid,
        log: &str,
    ) -> Result<Option<Conversion>, sqlx::Error> {
        let query = format!(
            "UPDATE conversions \
             SET status_id = $2, log = $3, updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(id)
            .bind(ConversionStatus::Failed.id())
            .bind(log)
            .bind(&ACTIVE_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// Dismiss a conversion unless it already reached a terminal state.
    ///
    /// Returns `true` if the status changed.
    pub async fn dismiss(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE conversions \
             SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(ConversionStatus::Dismissed.id())
        .bind(&OPEN_STATUSES[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enqueue a new Pending conversion cloned from `original`.
    ///
    /// The new row has `retry_of` pointing to the original, which is not
    /// modified.
    pub async fn retry(pool: &PgPool, original: &Conversion) -> Result<Conversion, sqlx::Error> {
        let input = CreateConversion {
            url: original.url.clone(),
            title: original.title.clone(),
            downloader: original.downloader.clone(),
            properties: original.properties.clone(),
            user_id: original.user_id,
        };
        Self::create(pool, &input, Some(original.id)).await
    }

    /// Clear the owning principal.
    pub async fn disown(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE conversions SET user_id = NULL, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
