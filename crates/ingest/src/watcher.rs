use crate::config::WatchConfig;
use crate::ingestor::Ingestor;
use crate::manifest::MANIFEST_FILE_NAME;
use crate::normalizer::Normalizer;
use crate::stats::WatchReport;
use crate::{IngestError, Result};
use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Partial-download and editor artifacts never dispatched.
const IGNORED_SUFFIXES: [&str; 3] = [".tmp", ".part", ".crdownload"];

/// Watches the inbox and drives each new submission through the Normalizer,
/// then sweeps pending dataset files through the Ingestor. Dispatches run one
/// at a time, in event order.
pub struct InboxWatcher {
    normalizer: Normalizer,
    ingestor: Ingestor,
    settings: WatchConfig,
    debounce: DebounceWindow,
    report: WatchReport,
}

impl InboxWatcher {
    pub fn new(normalizer: Normalizer, ingestor: Ingestor, settings: WatchConfig) -> Self {
        Self {
            normalizer,
            ingestor,
            debounce: DebounceWindow::new(settings.debounce()),
            settings,
            report: WatchReport::default(),
        }
    }

    #[must_use]
    pub const fn report(&self) -> WatchReport {
        self.report
    }

    /// Sweep leftovers, then process inbox events until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<WatchReport>
    where
        F: Future<Output = ()>,
    {
        let inbox = self.normalizer.layout().inbox.clone();
        self.normalizer.layout().ensure_dirs().await?;

        // Registered before the sweep so arrivals during it are queued.
        let (event_tx, mut event_rx) = mpsc::channel(1024);
        let _watcher = create_fs_watcher(&inbox, event_tx)?;
        info!("Watching {}", inbox.display());

        info!("Startup sweep of pending dataset files");
        self.sweep().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = event_rx.recv() => match event {
                    Some(Ok(event)) => {
                        if !is_arrival(&event.kind) {
                            continue;
                        }
                        for path in event.paths {
                            self.handle_path(&path).await;
                        }
                    }
                    Some(Err(err)) => warn!("watch error: {err}"),
                    None => {
                        warn!("watch channel closed");
                        break;
                    }
                }
            }
        }
        Ok(self.report)
    }

    /// Filter, readiness and debounce for one event path; dispatches when all
    /// pass. Returns whether the path was dispatched.
    pub async fn handle_path(&mut self, path: &Path) -> bool {
        if !is_candidate(path) {
            debug!("Ignoring {}", path.display());
            return false;
        }
        if !is_ready(path, self.settings.ready_wait()).await {
            debug!("{} not ready; dropping event", path.display());
            return false;
        }
        let key = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        if !self.debounce.admit(&key, Instant::now()) {
            debug!("Debounced {}", path.display());
            return false;
        }
        self.dispatch(path).await;
        true
    }

    async fn dispatch(&mut self, path: &Path) {
        self.report.dispatched += 1;
        match self.normalizer.normalize(path).await {
            Ok(outcome) => {
                info!("OK: {}", outcome.destination.display());
                self.sweep().await;
            }
            Err(err) => {
                self.report.normalize_failures += 1;
                if err.is_rejection() {
                    warn!("Rejected {}: {err}", path.display());
                } else {
                    error!("Dispatch of {} failed: {err}", path.display());
                }
            }
        }
    }

    async fn sweep(&mut self) {
        let sweep = self.ingestor.ingest_pending().await;
        if !sweep.ingested.is_empty() {
            info!(
                "Ingested {} dataset file(s), {} records",
                sweep.ingested.len(),
                sweep.records()
            );
        }
        self.report.absorb(&sweep);
    }
}

fn is_arrival(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// `.json` / `.jsonl` submissions, excluding the manifest and partial files.
#[must_use]
pub fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name == MANIFEST_FILE_NAME || name.ends_with('~') {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    if IGNORED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return false;
    }
    lower.ends_with(".json") || lower.ends_with(".jsonl")
}

/// Size probe, pause, size probe: equal sizes mean the writer is done.
pub async fn is_ready(path: &Path, wait: Duration) -> bool {
    let first = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return false,
    };
    tokio::time::sleep(wait).await;
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() == first,
        Err(_) => false,
    }
}

/// Last dispatch instant per path. Entries older than the window are evicted
/// on every admission, so memory stays bounded by the event rate.
#[derive(Debug)]
pub struct DebounceWindow {
    window: Duration,
    recent: VecDeque<(PathBuf, Instant)>,
}

impl DebounceWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: VecDeque::new(),
        }
    }

    /// Record a dispatch of `key` at `now` unless one happened within the window.
    pub fn admit(&mut self, key: &Path, now: Instant) -> bool {
        self.recent
            .retain(|(_, ts)| now.saturating_duration_since(*ts) < self.window);
        if self.recent.iter().any(|(p, _)| p == key) {
            return false;
        }
        self.recent.push_back((key.to_path_buf(), now));
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

fn create_fs_watcher(
    inbox: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default(),
    )
    .map_err(|e| IngestError::Other(format!("watcher init failed: {e}")))?;
    watcher
        .watch(inbox, RecursiveMode::Recursive)
        .map_err(|e| IngestError::Other(format!("failed to watch {}: {e}", inbox.display())))?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, StoreBackend};
    use crate::layout::DataLayout;
    use attack_vector_store::{FileCollectionStore, StubEmbedder};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn candidate_filter() {
        for ok in ["a.json", "b.JSONL", "dir/c.Json"] {
            assert!(is_candidate(Path::new(ok)), "{ok}");
        }
        for skip in [
            "a.txt",
            "a.json.tmp",
            "a.jsonl.part",
            "a.json.crdownload",
            "a.json~",
            "MANIFEST.jsonl",
            "json",
        ] {
            assert!(!is_candidate(Path::new(skip)), "{skip}");
        }
    }

    #[test]
    fn debounce_suppresses_within_window_and_evicts() {
        let mut window = DebounceWindow::new(Duration::from_millis(100));
        let start = Instant::now();
        let a = Path::new("/inbox/a.json");
        let b = Path::new("/inbox/b.json");

        assert!(window.admit(a, start));
        assert!(!window.admit(a, start + Duration::from_millis(50)));
        assert!(window.admit(b, start + Duration::from_millis(60)));
        assert_eq!(window.len(), 2);

        // `a` aged out; `b` is still inside its window.
        assert!(window.admit(a, start + Duration::from_millis(120)));
        assert_eq!(window.len(), 2);

        assert!(window.admit(Path::new("/inbox/c.json"), start + Duration::from_secs(5)));
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn readiness_requires_a_stable_regular_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.json");
        std::fs::write(&file, "{}").unwrap();

        assert!(is_ready(&file, Duration::from_millis(10)).await);
        assert!(!is_ready(&temp.path().join("missing.json"), Duration::ZERO).await);
        assert!(!is_ready(temp.path(), Duration::ZERO).await);
    }

    #[tokio::test]
    async fn handle_path_normalizes_then_ingests() {
        let temp = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.data_root = temp.path().to_path_buf();
        config.collection.dim = 8;
        config.store.backend = StoreBackend::File;
        config.watch.ready_wait_ms = 10;
        let layout = config.layout();
        layout.ensure_dirs().await.unwrap();

        let store = FileCollectionStore::open(config.store_dir()).await.unwrap();
        let ingestor = Ingestor::new(
            config.clone(),
            Arc::new(StubEmbedder::new("stub", 8)),
            Arc::new(store),
        )
        .unwrap();
        let mut watcher = InboxWatcher::new(
            Normalizer::new(DataLayout::from_root(temp.path())),
            ingestor,
            config.watch,
        );

        let submission = layout.inbox.join("one.json");
        std::fs::write(
            &submission,
            r#"{"id":"p1","important":{"title":"One","category":"web","sub_category":"xss"}}"#,
        )
        .unwrap();

        assert!(watcher.handle_path(&submission).await);
        assert!(layout.datasets.join("web/xss/one_v1.jsonl").exists());
        assert!(layout.checkpoints.join("one_v1.done").exists());
        assert_eq!(
            watcher.report(),
            WatchReport {
                dispatched: 1,
                normalize_failures: 0,
                ingested: 1,
                ingest_failures: 0,
            }
        );

        // Moved out of the inbox, so a late event for it is dropped.
        assert!(!watcher.handle_path(&submission).await);
        assert!(!watcher.handle_path(&layout.inbox.join("skip.tmp")).await);
    }

    #[tokio::test]
    async fn failed_dispatch_skips_the_sweep_and_the_loop_carries_on() {
        let temp = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.data_root = temp.path().to_path_buf();
        config.collection.dim = 8;
        config.watch.ready_wait_ms = 10;
        let layout = config.layout();
        layout.ensure_dirs().await.unwrap();

        let leftover_dir = layout.datasets.join("web/xss");
        std::fs::create_dir_all(&leftover_dir).unwrap();
        std::fs::write(
            leftover_dir.join("old_v1.jsonl"),
            r#"{"id":"o1","important":{"category":"web","sub_category":"xss"}}"#,
        )
        .unwrap();

        let store = FileCollectionStore::open(config.store_dir()).await.unwrap();
        let ingestor = Ingestor::new(
            config.clone(),
            Arc::new(StubEmbedder::new("stub", 8)),
            Arc::new(store),
        )
        .unwrap();
        let mut watcher = InboxWatcher::new(Normalizer::new(layout.clone()), ingestor, config.watch);

        let broken = layout.inbox.join("broken.jsonl");
        std::fs::write(&broken, "{\"a\":}\n").unwrap();
        assert!(watcher.handle_path(&broken).await);

        assert!(layout.errors.join("broken.jsonl.failed").exists());
        assert!(!layout.checkpoints.join("old_v1.done").exists());
        assert_eq!(
            watcher.report(),
            WatchReport {
                dispatched: 1,
                normalize_failures: 1,
                ingested: 0,
                ingest_failures: 0,
            }
        );

        let good = layout.inbox.join("two.json");
        std::fs::write(
            &good,
            r#"{"id":"p2","important":{"title":"Two","category":"web","sub_category":"xss"}}"#,
        )
        .unwrap();
        assert!(watcher.handle_path(&good).await);

        assert!(layout.checkpoints.join("old_v1.done").exists());
        assert!(layout.checkpoints.join("two_v1.done").exists());
        assert_eq!(
            watcher.report(),
            WatchReport {
                dispatched: 2,
                normalize_failures: 1,
                ingested: 2,
                ingest_failures: 0,
            }
        );
    }
}
