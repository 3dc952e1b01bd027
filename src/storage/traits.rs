//! Abstract storage seam for relink.
//!
//! The entity service that owns the records is external. This trait is the
//! whole contract the propagation pipeline relies on:
//! - `find_one` surfaces a missing record as `StorageError::RecordNotFound`
//! - `find_many` honours `FindQuery` filters, projection and populate
//! - `update` applies a disconnect/connect patch per relation field, and
//!   connecting an already linked ID is a no-op
//!
//! Implementations must tolerate concurrent `update` calls on different
//! records; the rewriter never issues two concurrent updates for one record.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage::query::{FindQuery, RecordPatch};
use crate::value::{Record, RecordId, TypeKey};

/// Storage trait for typed records.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch one record by ID.
    async fn find_one(&self, type_key: &TypeKey, id: RecordId) -> Result<Record, StorageError>;

    /// Fetch every record matching the query.
    async fn find_many(
        &self,
        type_key: &TypeKey,
        query: &FindQuery,
    ) -> Result<Vec<Record>, StorageError>;

    /// Apply a partial relation update and return the updated record.
    async fn update(
        &self,
        type_key: &TypeKey,
        id: RecordId,
        patch: &RecordPatch,
    ) -> Result<Record, StorageError>;
}

#[async_trait]
impl<S: EntityStore + ?Sized> EntityStore for Arc<S> {
    async fn find_one(&self, type_key: &TypeKey, id: RecordId) -> Result<Record, StorageError> {
        (**self).find_one(type_key, id).await
    }

    async fn find_many(
        &self,
        type_key: &TypeKey,
        query: &FindQuery,
    ) -> Result<Vec<Record>, StorageError> {
        (**self).find_many(type_key, query).await
    }

    async fn update(
        &self,
        type_key: &TypeKey,
        id: RecordId,
        patch: &RecordPatch,
    ) -> Result<Record, StorageError> {
        (**self).update(type_key, id, patch).await
    }
}
