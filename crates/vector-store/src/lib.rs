//! # Attack Vector Store
//!
//! Embedding and vector-index capabilities used by the ingestion pipeline.
//!
//! ## Architecture
//!
//! ```text
//! CanonicalRecord[]
//!     │
//!     ├──> Embedder (stub | OpenAI-compatible HTTP)
//!     │      └─> Vec<f32>[dim], L2-normalized
//!     │
//!     └──> VectorStore (file-backed | Milvus REST)
//!            └─> PatternRow upsert by primary id
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use attack_vector_store::{CollectionSchema, FileCollectionStore, VectorStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = FileCollectionStore::open("data/vectors").await?;
//!     if !store.has_collection("attacks_v2").await? {
//!         store
//!             .create_collection(&CollectionSchema::attack_patterns("attacks_v2", 384))
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod embeddings_http;
mod error;
mod file_store;
mod milvus;
mod schema;
mod store;

pub use embeddings::{normalize, Embedder, StubEmbedder};
pub use embeddings_http::HttpEmbedder;
pub use error::{Result, VectorStoreError};
pub use file_store::FileCollectionStore;
pub use milvus::MilvusRestStore;
pub use schema::{
    CollectionSchema, FieldKind, FieldSpec, IndexSpec, PatternRow, PRIMARY_KEY_FIELD, RAW_FIELD,
    VECTOR_FIELD,
};
pub use store::VectorStore;
