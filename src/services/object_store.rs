//! Seam between the pipeline and whatever holds the objects.

use crate::{models::object::ObjectReference, services::storage_service::StorageResult};
use async_trait::async_trait;
use bytes::Bytes;

/// Object payload together with where it was found.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub reference: ObjectReference,
    pub body: Bytes,
}

/// Fetch and store whole objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object; `ObjectNotFound` when it does not exist.
    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<FetchedObject>;

    /// Write an object, replacing any previous version.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<ObjectReference>;
}
