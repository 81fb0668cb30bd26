//! Stored binary artifacts belonging to a conversion.

use pix360_core::asset::AssetData;
use pix360_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `assets` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Asset {
    pub id: Uuid,
    pub conversion_id: Option<Uuid>,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub mime_type: String,
    pub checksum_sha256: String,
    /// At most one asset per conversion carries the final panorama.
    pub is_result: bool,
    pub created_at: Timestamp,
}

impl Asset {
    /// Copy of the payload for handing to the stitching engine.
    pub fn data(&self) -> AssetData {
        AssetData::new(self.content.clone(), self.mime_type.clone())
    }
}
