use crate::error::Result;
use crate::schema::{CollectionSchema, IndexSpec, PatternRow};
use async_trait::async_trait;

/// Collection-oriented vector index.
///
/// Rows are keyed by their primary `id`; `upsert` replaces any existing row
/// with the same key.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Field names of an existing collection.
    async fn collection_fields(&self, name: &str) -> Result<Vec<String>>;

    async fn has_index(&self, collection: &str, field: &str) -> Result<bool>;

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()>;

    /// Insert or replace rows; returns the number of rows written.
    async fn upsert(&self, collection: &str, rows: Vec<PatternRow>) -> Result<usize>;
}
