//! The job/asset store contract the worker talks to.
//!
//! [`ConversionStore`] is the only way the dispatcher touches persistence:
//! it claims work and saves state through it. Every status change names the
//! status the caller believes the job is in, so a job dismissed by a user
//! while the worker holds it is never silently overwritten.

use async_trait::async_trait;
use pix360_core::asset::AssetData;
use uuid::Uuid;

use crate::models::asset::Asset;
use crate::models::conversion::{Conversion, CreateConversion};
use crate::models::status::ConversionStatus;

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conversion {0} not found")]
    NotFound(Uuid),

    #[error("Conversion {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ConversionStatus,
        to: ConversionStatus,
    },

    #[error("Conversion {id} is {status} and no longer accepts assets")]
    Inactive { id: Uuid, status: ConversionStatus },

    #[error("Conversion {id}: {reason}")]
    Conflict { id: Uuid, reason: String },
}

impl StoreError {
    /// Build the error for a transition that did not apply, given the row
    /// as it is now.
    pub fn rejected(id: Uuid, current: Option<&Conversion>, to: ConversionStatus) -> Self {
        match current {
            None => Self::NotFound(id),
            Some(row) => match row.status() {
                Some(from) => Self::InvalidTransition { id, from, to },
                None => Self::Conflict {
                    id,
                    reason: format!("unknown status id {}", row.status_id),
                },
            },
        }
    }

    /// Build the error for an asset write against a job that is no longer
    /// active, given the row as it is now.
    pub fn inactive(id: Uuid, current: Option<&Conversion>) -> Self {
        match current {
            None => Self::NotFound(id),
            Some(row) => match row.status() {
                Some(status) => Self::Inactive { id, status },
                None => Self::Conflict {
                    id,
                    reason: format!("unknown status id {}", row.status_id),
                },
            },
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// `true` when the job moved on underneath the caller: a rejected
    /// transition or an asset write to a job that left the active states.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. } | Self::Inactive { .. })
    }
}

/// Durable storage for conversions and their assets.
#[async_trait]
pub trait ConversionStore: Send + Sync {
    /// Enqueue a new Pending conversion.
    async fn create(&self, input: &CreateConversion) -> Result<Conversion, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversion>, StoreError>;

    /// All assets of a conversion, oldest first.
    async fn list_assets(&self, conversion_id: Uuid) -> Result<Vec<Asset>, StoreError>;

    /// Atomically move the oldest Pending conversion to Processing.
    async fn claim_next(&self) -> Result<Option<Conversion>, StoreError>;

    /// Move `id` from `from` to `to`.
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the move is illegal
    /// or the job is no longer in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: ConversionStatus,
        to: ConversionStatus,
    ) -> Result<Conversion, StoreError>;

    /// Record the downloader chosen for a conversion.
    async fn set_downloader(&self, id: Uuid, identifier: &str) -> Result<(), StoreError>;

    /// Attach an intermediate (non-result) asset to an active conversion.
    ///
    /// Fails with [`StoreError::Inactive`] once the job left the active
    /// states, for example after a dismissal.
    async fn add_asset(&self, id: Uuid, data: &AssetData) -> Result<Asset, StoreError>;

    /// Attach the result asset and move to Done, as one atomic step.
    async fn complete(
        &self,
        id: Uuid,
        from: ConversionStatus,
        result: &AssetData,
    ) -> Result<Asset, StoreError>;

    /// Move an active conversion to Failed and store `log`.
    async fn fail(&self, id: Uuid, log: &str) -> Result<Conversion, StoreError>;

    /// Move any non-terminal conversion to Dismissed. Returns whether the
    /// status changed.
    async fn dismiss(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Enqueue a fresh conversion cloning a terminal one. The original is
    /// left untouched.
    async fn retry(&self, id: Uuid) -> Result<Conversion, StoreError>;

    /// Detach a conversion from its owner.
    async fn disown(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Only finished conversions may be retried.
pub(crate) fn ensure_retryable(original: &Conversion) -> Result<(), StoreError> {
    match original.status() {
        Some(status) if status.is_terminal() => Ok(()),
        Some(status) => Err(StoreError::Conflict {
            id: original.id,
            reason: format!("cannot retry a conversion that is still {status}"),
        }),
        None => Err(StoreError::Conflict {
            id: original.id,
            reason: format!("unknown status id {}", original.status_id),
        }),
    }
}
