use serde::Serialize;
use std::path::PathBuf;

/// A committed normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeOutcome {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    pub sub_category: String,
    pub slug: String,
    pub version: u32,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source: PathBuf,
    pub records: usize,
    /// Number of embed + upsert round trips
    pub batches: usize,
    pub vector_dim: usize,
    pub checkpoint: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested(IngestReport),
    AlreadyIngested { checkpoint: PathBuf },
    InFlight { lock: PathBuf },
}

impl IngestOutcome {
    #[must_use]
    pub const fn is_ingested(&self) -> bool {
        matches!(self, Self::Ingested(_))
    }
}

/// Result of ingesting every pending dataset file.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub ingested: Vec<IngestReport>,
    pub skipped: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl SweepReport {
    #[must_use]
    pub fn records(&self) -> usize {
        self.ingested.iter().map(|r| r.records).sum()
    }
}

/// Counters reported when the watcher shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchReport {
    pub dispatched: usize,
    pub normalize_failures: usize,
    pub ingested: usize,
    pub ingest_failures: usize,
}

impl WatchReport {
    pub fn absorb(&mut self, sweep: &SweepReport) {
        self.ingested += sweep.ingested.len();
        self.ingest_failures += sweep.failures.len();
    }
}
