//! Conversion job entity and its create DTO.

use pix360_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{ConversionStatus, StatusId};

/// A row from the `conversions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversion {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    /// Identifier of the pinned (or, once chosen, the selected) downloader.
    pub downloader: Option<String>,
    /// Free-form settings handed to the downloader untouched.
    pub properties: serde_json::Value,
    pub status_id: StatusId,
    pub log: Option<String>,
    /// Owning principal, managed by the external identity store.
    pub user_id: Option<DbId>,
    pub retry_of: Option<Uuid>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversion {
    /// Decoded status, `None` for an ID this build does not know.
    pub fn status(&self) -> Option<ConversionStatus> {
        ConversionStatus::from_id(self.status_id)
    }

    /// A top-level entry of the property map.
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// DTO for enqueuing a new conversion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateConversion {
    pub url: String,
    pub title: Option<String>,
    pub downloader: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
    pub user_id: Option<DbId>,
}

impl CreateConversion {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_downloader(mut self, identifier: impl Into<String>) -> Self {
        self.downloader = Some(identifier.into());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_owner(mut self, user_id: DbId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Properties as stored: a missing map becomes `{}`.
    pub fn properties_or_empty(&self) -> serde_json::Value {
        if self.properties.is_null() {
            serde_json::json!({})
        } else {
            self.properties.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_dto_defaults_properties_to_empty_map() {
        let input: CreateConversion =
            serde_json::from_str(r#"{"url": "https://example.com/pano.jpg"}"#).unwrap();
        assert!(input.properties.is_null());
        assert_eq!(input.properties_or_empty(), serde_json::json!({}));
        assert_eq!(input.title, None);
    }

    #[test]
    fn builder_sets_optional_fields() {
        let input = CreateConversion::new("https://example.com/{face}.jpg")
            .with_title("Lobby")
            .with_downloader("cubemap-template")
            .with_properties(serde_json::json!({"rotation": [0, 90, 0]}))
            .with_owner(7);

        assert_eq!(input.title.as_deref(), Some("Lobby"));
        assert_eq!(input.downloader.as_deref(), Some("cubemap-template"));
        assert_eq!(input.user_id, Some(7));
        assert_eq!(input.properties_or_empty()["rotation"][1], 90);
    }
}
