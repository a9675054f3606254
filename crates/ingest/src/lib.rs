//! # Attack Ingest
//!
//! File-based ingestion pipeline for attack-pattern records.
//!
//! ## Pipeline
//!
//! ```text
//! inbox/<submission>.json[l]
//!     │
//!     ├──> Normalizer (validate, classify, version)
//!     │      └─> datasets/<category>/<sub_category>/<slug>_v<N>.jsonl
//!     │
//!     └──> Ingestor (checkpoint + lock gated, batched)
//!            └─> embed_batch → upsert into the vector collection
//! ```
//!
//! The [`InboxWatcher`] drives both stages from filesystem events.
//!
//! ## Example
//!
//! ```no_run
//! use attack_ingest::{Ingestor, Normalizer, PipelineConfig};
//! use attack_vector_store::{FileCollectionStore, StubEmbedder};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::discover(None)?;
//!     let normalized = Normalizer::new(config.layout())
//!         .normalize(Path::new("data/inbox/sample.json"))
//!         .await?;
//!
//!     let embedder = Arc::new(StubEmbedder::new(&config.model_name, config.collection.dim));
//!     let store = Arc::new(FileCollectionStore::open(config.store_dir()).await?);
//!     let ingestor = Ingestor::new(config, embedder, store)?;
//!     ingestor.ingest_file(&normalized.destination).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod ingestor;
mod journal;
mod layout;
mod manifest;
mod markers;
mod normalizer;
mod scanner;
mod stats;
mod watcher;

pub use config::{
    CollectionConfig, EmbedderConfig, EmbeddingMode, LockConfig, PathsConfig, PipelineConfig,
    StoreBackend, StoreConfig, WatchConfig, CONFIG_PATH_ENV, EMBEDDING_MODE_ENV,
};
pub use error::{IngestError, Result};
pub use ingestor::Ingestor;
pub use journal::Journal;
pub use layout::DataLayout;
pub use manifest::{append_manifest, manifest_path, read_manifest, ManifestEntry, MANIFEST_FILE_NAME};
pub use markers::{
    checkpoint_path, lock_path, read_checkpoint, write_checkpoint, Checkpoint, IngestLock,
    LockAttempt,
};
pub use normalizer::{next_version, Normalizer};
pub use scanner::pending_dataset_files;
pub use stats::{IngestOutcome, IngestReport, NormalizeOutcome, SweepReport, WatchReport};
pub use watcher::{is_candidate, is_ready, DebounceWindow, InboxWatcher};
