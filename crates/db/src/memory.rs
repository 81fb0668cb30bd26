//! In-process [`ConversionStore`] for tests and local runs.
//!
//! Follows the same contract as the PostgreSQL store: claims are atomic
//! under the lock, status changes are compare-and-set, and completion
//! attaches the result asset in the same critical section.

use async_trait::async_trait;
use chrono::Utc;
use pix360_core::asset::AssetData;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::asset::Asset;
use crate::models::conversion::{Conversion, CreateConversion};
use crate::models::status::ConversionStatus;
use crate::store::{ensure_retryable, ConversionStore, StoreError};

#[derive(Default)]
struct Tables {
    /// Insertion order doubles as creation order.
    conversions: Vec<Conversion>,
    assets: Vec<Asset>,
}

impl Tables {
    fn get_mut(&mut self, id: Uuid) -> Result<&mut Conversion, StoreError> {
        self.conversions
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    fn insert(&mut self, input: &CreateConversion, retry_of: Option<Uuid>) -> Conversion {
        let now = Utc::now();
        let conversion = Conversion {
            id: Uuid::new_v4(),
            url: input.url.clone(),
            title: input.title.clone(),
            downloader: input.downloader.clone(),
            properties: input.properties_or_empty(),
            status_id: ConversionStatus::Pending.id(),
            log: None,
            user_id: input.user_id,
            retry_of,
            created_at: now,
            updated_at: now,
        };
        self.conversions.push(conversion.clone());
        conversion
    }

    /// Compare-and-set status change.
    fn update_status(
        &mut self,
        id: Uuid,
        from: ConversionStatus,
        to: ConversionStatus,
    ) -> Result<&mut Conversion, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }
        let conversion = self.get_mut(id)?;
        if conversion.status_id != from.id() {
            return Err(StoreError::rejected(id, Some(&*conversion), to));
        }
        conversion.status_id = to.id();
        conversion.updated_at = Utc::now();
        Ok(conversion)
    }

    fn push_asset(&mut self, conversion_id: Uuid, data: &AssetData, is_result: bool) -> Asset {
        let asset = Asset {
            id: Uuid::new_v4(),
            conversion_id: Some(conversion_id),
            content: data.bytes.clone(),
            mime_type: data.mime_type.clone(),
            checksum_sha256: data.checksum(),
            is_result,
            created_at: Utc::now(),
        };
        self.assets.push(asset.clone());
        asset
    }
}

/// Store keeping every row in memory behind one async mutex.
#[derive(Default)]
pub struct MemoryConversionStore {
    tables: Mutex<Tables>,
}

impl MemoryConversionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversions.
    pub async fn len(&self) -> usize {
        self.tables.lock().await.conversions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ConversionStore for MemoryConversionStore {
    async fn create(&self, input: &CreateConversion) -> Result<Conversion, StoreError> {
        Ok(self.tables.lock().await.insert(input, None))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversion>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.conversions.iter().find(|c| c.id == id).cloned())
    }

    async fn list_assets(&self, conversion_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assets
            .iter()
            .filter(|a| a.conversion_id == Some(conversion_id))
            .cloned()
            .collect())
    }

    async fn claim_next(&self) -> Result<Option<Conversion>, StoreError> {
        let mut tables = self.tables.lock().await;
        let pending = ConversionStatus::Pending.id();

        let Some(conversion) = tables
            .conversions
            .iter_mut()
            .find(|c| c.status_id == pending)
        else {
            return Ok(None);
        };

        conversion.status_id = ConversionStatus::Processing.id();
        conversion.updated_at = Utc::now();
        Ok(Some(conversion.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ConversionStatus,
        to: ConversionStatus,
    ) -> Result<Conversion, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables.update_status(id, from, to)?.clone())
    }

    async fn set_downloader(&self, id: Uuid, identifier: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let conversion = tables.get_mut(id)?;
        conversion.downloader = Some(identifier.to_string());
        conversion.updated_at = Utc::now();
        Ok(())
    }

    async fn add_asset(&self, id: Uuid, data: &AssetData) -> Result<Asset, StoreError> {
        let mut tables = self.tables.lock().await;
        let conversion = tables.get_mut(id)?;
        if !conversion.status().is_some_and(ConversionStatus::is_active) {
            return Err(StoreError::inactive(id, Some(&*conversion)));
        }
        Ok(tables.push_asset(id, data, false))
    }

    async fn complete(
        &self,
        id: Uuid,
        from: ConversionStatus,
        result: &AssetData,
    ) -> Result<Asset, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.update_status(id, from, ConversionStatus::Done)?;
        Ok(tables.push_asset(id, result, true))
    }

    async fn fail(&self, id: Uuid, log: &str) -> Result<Conversion, StoreError> {
        let mut tables = self.tables.lock().await;
        let conversion = tables.get_mut(id)?;

        let active = conversion.status().is_some_and(ConversionStatus::is_active);
        if !active {
            return Err(StoreError::rejected(
                id,
                Some(&*conversion),
                ConversionStatus::Failed,
            ));
        }

        conversion.status_id = ConversionStatus::Failed.id();
        conversion.log = Some(log.to_string());
        conversion.updated_at = Utc::now();
        Ok(conversion.clone())
    }

    async fn dismiss(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let conversion = tables.get_mut(id)?;

        match conversion.status() {
            Some(status) if !status.is_terminal() => {
                conversion.status_id = ConversionStatus::Dismissed.id();
                conversion.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry(&self, id: Uuid) -> Result<Conversion, StoreError> {
        let mut tables = self.tables.lock().await;
        let original = tables.get_mut(id)?.clone();
        ensure_retryable(&original)?;

        let input = CreateConversion {
            url: original.url,
            title: original.title,
            downloader: original.downloader,
            properties: original.properties,
            user_id: original.user_id,
        };
        Ok(tables.insert(&input, Some(id)))
    }

    async fn disown(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let conversion = tables.get_mut(id)?;
        conversion.user_id = None;
        conversion.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn png(bytes: &[u8]) -> AssetData {
        AssetData::new(bytes.to_vec(), "image/png")
    }

    async fn seeded(urls: &[&str]) -> (MemoryConversionStore, Vec<Conversion>) {
        let store = MemoryConversionStore::new();
        let mut rows = Vec::new();
        for url in urls {
            rows.push(store.create(&CreateConversion::new(*url)).await.unwrap());
        }
        (store, rows)
    }

    #[tokio::test]
    async fn created_conversions_start_pending_with_empty_properties() {
        let (store, rows) = seeded(&["https://example.com/a.jpg"]).await;
        let row = &rows[0];

        assert_eq!(row.status(), Some(ConversionStatus::Pending));
        assert_eq!(row.properties, serde_json::json!({}));
        assert!(row.log.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_first() {
        let (store, rows) = seeded(&["https://a", "https://b"]).await;

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.id, rows[0].id);
        assert_eq!(first.status(), Some(ConversionStatus::Processing));

        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.id, rows[1].id);

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dismissed_conversions_are_never_claimed() {
        let (store, rows) = seeded(&["https://a"]).await;

        assert!(store.dismiss(rows[0].id).await.unwrap());
        assert!(store.claim_next().await.unwrap().is_none());

        let row = store.find_by_id(rows[0].id).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(ConversionStatus::Dismissed));
    }

    #[tokio::test]
    async fn dismissing_a_terminal_conversion_changes_nothing() {
        let (store, rows) = seeded(&["https://a"]).await;
        let id = rows[0].id;
        store.claim_next().await.unwrap();
        store.fail(id, "boom").await.unwrap();

        assert!(!store.dismiss(id).await.unwrap());
        let row = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(ConversionStatus::Failed));
    }

    #[tokio::test]
    async fn stale_transition_is_rejected_with_current_status() {
        let (store, rows) = seeded(&["https://a"]).await;
        let id = rows[0].id;
        store.claim_next().await.unwrap();
        store.dismiss(id).await.unwrap();

        let err = store
            .transition(id, ConversionStatus::Processing, ConversionStatus::Downloading)
            .await
            .unwrap_err();

        assert!(err.is_invalid_transition());
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: ConversionStatus::Dismissed,
                to: ConversionStatus::Downloading,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_touching_the_row() {
        let (store, rows) = seeded(&["https://a"]).await;
        let id = rows[0].id;

        let err = store
            .transition(id, ConversionStatus::Pending, ConversionStatus::Done)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());

        let row = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(ConversionStatus::Pending));
    }

    #[tokio::test]
    async fn dismissed_conversion_rejects_intermediate_assets() {
        let (store, rows) = seeded(&["https://a"]).await;
        let id = rows[0].id;
        store.claim_next().await.unwrap();
        store.add_asset(id, &png(b"face")).await.unwrap();
        assert!(store.dismiss(id).await.unwrap());

        let err = store.add_asset(id, &png(b"late face")).await.unwrap_err();
        assert!(err.is_stale());
        assert!(matches!(
            err,
            StoreError::Inactive {
                status: ConversionStatus::Dismissed,
                ..
            }
        ));
        assert_eq!(store.list_assets(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_attaches_exactly_one_result() {
        let (store, rows) = seeded(&["https://a"]).await;
        let id = rows[0].id;
        store.claim_next().await.unwrap();
        store
            .transition(id, ConversionStatus::Processing, ConversionStatus::Downloading)
            .await
            .unwrap();
        store.add_asset(id, &png(b"face")).await.unwrap();

        let result = store
            .complete(id, ConversionStatus::Downloading, &png(b"panorama"))
            .await
            .unwrap();
        assert!(result.is_result);
        assert_eq!(result.checksum_sha256, png(b"panorama").checksum());

        let assets = store.list_assets(id).await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets.iter().filter(|a| a.is_result).count(), 1);

        let row = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.status(), Some(ConversionStatus::Done));

        // A second completion is stale and adds nothing.
        assert!(store
            .complete(id, ConversionStatus::Downloading, &png(b"again"))
            .await
            .is_err());
        assert_eq!(store.list_assets(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fail_requires_an_active_conversion() {
        let (store, rows) = seeded(&["https://a"]).await;
        let id = rows[0].id;

        assert!(store.fail(id, "too early").await.is_err());

        store.claim_next().await.unwrap();
        let failed = store.fail(id, "No capable downloader").await.unwrap();
        assert_eq!(failed.status(), Some(ConversionStatus::Failed));
        assert_eq!(failed.log.as_deref(), Some("No capable downloader"));
    }

    #[tokio::test]
    async fn retry_creates_fresh_conversion_and_leaves_original_untouched() {
        let store = MemoryConversionStore::new();
        let original = store
            .create(
                &CreateConversion::new("https://example.com/{face}.jpg")
                    .with_title("Atrium")
                    .with_properties(serde_json::json!({"rotation": [0, 90, 0]}))
                    .with_owner(42),
            )
            .await
            .unwrap();
        store.claim_next().await.unwrap();
        store.fail(original.id, "boom").await.unwrap();

        let retried = store.retry(original.id).await.unwrap();

        assert_ne!(retried.id, original.id);
        assert_eq!(retried.url, original.url);
        assert_eq!(retried.title.as_deref(), Some("Atrium"));
        assert_eq!(retried.properties, original.properties);
        assert_eq!(retried.user_id, Some(42));
        assert_eq!(retried.retry_of, Some(original.id));
        assert_eq!(retried.status(), Some(ConversionStatus::Pending));
        assert!(retried.log.is_none());

        let unchanged = store.find_by_id(original.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status(), Some(ConversionStatus::Failed));
        assert_eq!(unchanged.log.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn retry_of_an_open_conversion_is_a_conflict() {
        let (store, rows) = seeded(&["https://a"]).await;
        let err = store.retry(rows[0].id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn disown_clears_owner() {
        let store = MemoryConversionStore::new();
        let row = store
            .create(&CreateConversion::new("https://a").with_owner(5))
            .await
            .unwrap();

        store.disown(row.id).await.unwrap();
        let row = store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(row.user_id, None);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = MemoryConversionStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.dismiss(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.retry(id).await, Err(StoreError::NotFound(_))));
        assert!(store.find_by_id(id).await.unwrap().is_none());
    }
}
