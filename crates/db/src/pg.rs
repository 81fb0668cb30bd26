//! [`ConversionStore`] backed by PostgreSQL.

use async_trait::async_trait;
use pix360_core::asset::AssetData;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::asset::Asset;
use crate::models::conversion::{Conversion, CreateConversion};
use crate::models::status::ConversionStatus;
use crate::repositories::{AssetRepo, ConversionRepo};
use crate::store::{ensure_retryable, ConversionStore, StoreError};

/// Store delegating to the repositories over a shared pool.
#[derive(Debug, Clone)]
pub struct PgConversionStore {
    pool: PgPool,
}

impl PgConversionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Error for an update that matched no row, from the row as it is now.
    async fn rejected(&self, id: Uuid, to: ConversionStatus) -> StoreError {
        match ConversionRepo::find_by_id(&self.pool, id).await {
            Ok(current) => StoreError::rejected(id, current.as_ref(), to),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl ConversionStore for PgConversionStore {
    async fn create(&self, input: &CreateConversion) -> Result<Conversion, StoreError> {
        Ok(ConversionRepo::create(&self.pool, input, None).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversion>, StoreError> {
        Ok(ConversionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_assets(&self, conversion_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        Ok(AssetRepo::list_for_conversion(&self.pool, conversion_id).await?)
    }

    async fn claim_next(&self) -> Result<Option<Conversion>, StoreError> {
        let claimed = ConversionRepo::claim_next(&self.pool).await?;
        if let Some(conversion) = &claimed {
            tracing::debug!(
                conversion_id = %conversion.id,
                url = %conversion.url,
                "Claimed conversion",
            );
        }
        Ok(claimed)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ConversionStatus,
        to: ConversionStatus,
    ) -> Result<Conversion, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }
        match ConversionRepo::update_status(&self.pool, id, from, to).await? {
            Some(conversion) => Ok(conversion),
            None => Err(self.rejected(id, to).await),
        }
    }

    async fn set_downloader(&self, id: Uuid, identifier: &str) -> Result<(), StoreError> {
        if ConversionRepo::set_downloader(&self.pool, id, identifier).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    async fn add_asset(&self, id: Uuid, data: &AssetData) -> Result<Asset, StoreError> {
        match AssetRepo::insert_if_active(&self.pool, id, data).await? {
            Some(asset) => Ok(asset),
            None => {
                let current = ConversionRepo::find_by_id(&self.pool, id).await?;
                Err(StoreError::inactive(id, current.as_ref()))
            }
        }
    }

    async fn complete(
        &self,
        id: Uuid,
        from: ConversionStatus,
        result: &AssetData,
    ) -> Result<Asset, StoreError> {
        let to = ConversionStatus::Done;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }

        let mut tx = self.pool.begin().await?;

        // Status first: a stale job must not receive a result asset.
        if ConversionRepo::update_status(&mut *tx, id, from, to)
            .await?
            .is_none()
        {
            tx.rollback().await?;
            let err = self.rejected(id, to).await;
            tracing::warn!(
                conversion_id = %id,
                %from,
                error = %err,
                "Result rejected, conversion moved on",
            );
            return Err(err);
        }

        let asset = AssetRepo::insert(&mut *tx, id, result, true).await?;
        tx.commit().await?;
        Ok(asset)
    }

    async fn fail(&self, id: Uuid, log: &str) -> Result<Conversion, StoreError> {
        match ConversionRepo::fail(&self.pool, id, log).await? {
            Some(conversion) => Ok(conversion),
            None => {
                let err = self.rejected(id, ConversionStatus::Failed).await;
                tracing::warn!(
                    conversion_id = %id,
                    error = %err,
                    "Failure not recorded, conversion is not active",
                );
                Err(err)
            }
        }
    }

    async fn dismiss(&self, id: Uuid) -> Result<bool, StoreError> {
        if ConversionRepo::dismiss(&self.pool, id).await? {
            return Ok(true);
        }
        match ConversionRepo::find_by_id(&self.pool, id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn retry(&self, id: Uuid) -> Result<Conversion, StoreError> {
        let original = ConversionRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        ensure_retryable(&original)?;
        Ok(ConversionRepo::retry(&self.pool, &original).await?)
    }

    async fn disown(&self, id: Uuid) -> Result<(), StoreError> {
        if ConversionRepo::disown(&self.pool, id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }
}
