//! Trait abstraction over the REST record endpoints

use async_trait::async_trait;
use serde_json::Value;

use super::error::ApiError;
use super::models::ImportResponse;
use crate::events::EntityKind;
use crate::view::PageQuery;

/// Everything a live view needs from the backend.
///
/// Implemented by [`super::ApiClient`] over HTTP and by in-memory mocks in
/// tests. Bodies are returned as raw JSON; list bodies go through the
/// normalizer because their shape varies per endpoint.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// One page of a list view
    async fn list(&self, entity: EntityKind, query: &PageQuery) -> Result<Value, ApiError>;

    /// A single record
    async fn get(&self, entity: EntityKind, id: i64) -> Result<Value, ApiError>;

    async fn create(&self, entity: EntityKind, body: &Value) -> Result<Value, ApiError>;

    async fn update(&self, entity: EntityKind, id: i64, body: &Value) -> Result<Value, ApiError>;

    async fn delete(&self, entity: EntityKind, id: i64) -> Result<(), ApiError>;

    /// Upload a bulk-import file for `entity`
    async fn upload_import(
        &self,
        entity: EntityKind,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<ImportResponse, ApiError>;
}
