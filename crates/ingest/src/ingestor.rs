use crate::config::PipelineConfig;
use crate::journal::Journal;
use crate::layout::DataLayout;
use crate::markers::{checkpoint_path, write_checkpoint, Checkpoint, IngestLock, LockAttempt};
use crate::scanner::pending_dataset_files;
use crate::stats::{IngestOutcome, IngestReport, SweepReport};
use crate::{IngestError, Result};
use attack_records::{embedding_text, CanonicalRecord, ScalarProjection};
use attack_vector_store::{
    Embedder, PatternRow, VectorStore, VectorStoreError, RAW_FIELD, VECTOR_FIELD,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Embeds dataset files and upserts them into the vector collection, exactly
/// once per file stem.
pub struct Ingestor {
    config: PipelineConfig,
    layout: DataLayout,
    journal: Journal,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

/// Records buffered for one embed + upsert round trip.
struct PendingBatch {
    texts: Vec<String>,
    rows: Vec<(ScalarProjection, CanonicalRecord)>,
}

impl PendingBatch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            texts: Vec::with_capacity(capacity),
            rows: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.texts.len()
    }

    fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

impl Ingestor {
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.collection.dim {
            return Err(IngestError::Config(format!(
                "embedder '{}' produces {}-dim vectors but collection.dim is {}",
                embedder.model_name(),
                embedder.dimension(),
                config.collection.dim
            )));
        }
        let layout = config.layout();
        let journal = Journal::new(&layout.logs);
        Ok(Self {
            config,
            layout,
            journal,
            embedder,
            store,
        })
    }

    #[must_use]
    pub const fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Create the collection and its vector index when absent.
    pub async fn ensure_collection(&self) -> Result<()> {
        let name = &self.config.collection.name;
        if self.store.has_collection(name).await? {
            let fields = self.store.collection_fields(name).await?;
            if !fields.iter().any(|f| f == RAW_FIELD) {
                log::warn!(
                    "Collection '{name}' has no '{RAW_FIELD}' field; original records will not be stored"
                );
            }
        } else {
            log::info!(
                "Creating collection '{name}' (dim={})",
                self.config.collection.dim
            );
            self.store
                .create_collection(&self.config.collection_schema())
                .await?;
        }

        if !self.store.has_index(name, VECTOR_FIELD).await? {
            let spec = self.config.index_spec();
            log::info!(
                "Creating {} index on '{name}.{}' ({})",
                spec.index_type,
                spec.field,
                spec.metric_type
            );
            self.store.create_index(name, &spec).await?;
        }
        Ok(())
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        if !path.is_file() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| IngestError::InvalidPath(path.display().to_string()))?;
        let root = &self.layout.checkpoints;

        let checkpoint = checkpoint_path(root, stem);
        if checkpoint.exists() {
            log::info!("Already ingested (found): {}", checkpoint.display());
            return Ok(IngestOutcome::AlreadyIngested { checkpoint });
        }

        let _lock =
            match IngestLock::try_acquire(root, stem, self.config.lock_stale_after()).await? {
                LockAttempt::Acquired(guard) => guard,
                LockAttempt::Held { path: lock } => {
                    log::info!("Another ingest is in progress for {stem}, skipping.");
                    return Ok(IngestOutcome::InFlight { lock });
                }
            };

        // A run that finished between the gate and the lock.
        if checkpoint.exists() {
            log::info!("Already ingested (found): {}", checkpoint.display());
            return Ok(IngestOutcome::AlreadyIngested { checkpoint });
        }

        self.ensure_collection().await?;
        let (records, batches) = self.stream_batches(path, stem).await?;

        let marker = Checkpoint::now(
            path,
            &self.config.collection.name,
            records,
            self.embedder.model_name(),
            self.config.collection.dim,
        );
        let checkpoint = write_checkpoint(root, stem, &marker).await?;
        log::info!("Checkpoint written: {}", checkpoint.display());
        log::info!(
            "Total records ingested from {}: {records}",
            path.display()
        );
        self.journal
            .record(&format!(
                "Ingested {} into {} (records={records})",
                path.display(),
                self.config.collection.name
            ))
            .await;

        Ok(IngestOutcome::Ingested(IngestReport {
            source: path.to_path_buf(),
            records,
            batches,
            vector_dim: self.config.collection.dim,
            checkpoint,
        }))
    }

    /// Ingest every dataset file lacking both checkpoint and lock. A failing
    /// file is recorded and the sweep moves on.
    pub async fn ingest_pending(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for path in pending_dataset_files(&self.layout) {
            match self.ingest_file(&path).await {
                Ok(IngestOutcome::Ingested(done)) => report.ingested.push(done),
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    log::error!("Ingest failed for {}: {err}", path.display());
                    report.failures.push((path, err.to_string()));
                }
            }
        }
        report
    }

    async fn stream_batches(&self, path: &Path, stem: &str) -> Result<(usize, usize)> {
        let batch_size = self.config.batch_size;
        let mut lines = BufReader::new(tokio::fs::File::open(path).await?).lines();
        let mut batch = PendingBatch::with_capacity(batch_size);
        let mut records = 0usize;
        let mut batches = 0usize;
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = match CanonicalRecord::from_json_str(trimmed) {
                Ok(record) => record,
                Err(err) => {
                    log::warn!(
                        "Skipping unparsable line {line_no} in {}: {err}",
                        path.display()
                    );
                    continue;
                }
            };

            let projection = ScalarProjection::from_record(&record, || format!("{stem}:{line_no}"));
            batch.texts.push(embedding_text(&record));
            batch.rows.push((projection, record));

            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, PendingBatch::with_capacity(batch_size));
                records += self.flush(full).await?;
                batches += 1;
            }
        }

        if !batch.is_empty() {
            records += self.flush(batch).await?;
            batches += 1;
        }
        Ok((records, batches))
    }

    async fn flush(&self, batch: PendingBatch) -> Result<usize> {
        let expected = batch.len();
        let vectors = self.embedder.embed_batch(&batch.texts).await?;
        if vectors.len() != expected {
            return Err(VectorStoreError::EmbeddingError(format!(
                "embedder returned {} vectors for {expected} texts",
                vectors.len()
            ))
            .into());
        }

        let dim = self.config.collection.dim;
        let mut rows = Vec::with_capacity(expected);
        for ((projection, record), embedding) in batch.rows.into_iter().zip(vectors) {
            if embedding.len() != dim {
                return Err(VectorStoreError::InvalidDimension {
                    expected: dim,
                    actual: embedding.len(),
                }
                .into());
            }
            rows.push(PatternRow::new(projection, embedding, record));
        }

        self.store
            .upsert(&self.config.collection.name, rows)
            .await?;
        log::info!("Inserted batch of {expected} records");
        Ok(expected)
    }
}
