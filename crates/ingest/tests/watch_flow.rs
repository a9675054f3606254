use attack_ingest::{InboxWatcher, Ingestor, Normalizer, PipelineConfig, WatchReport};
use attack_vector_store::{FileCollectionStore, StubEmbedder};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;

const SAMPLE: &str = r#"{"id":"s-1","important":{"category":"malware","sub_category":"ransomware","title":"Sample X","tags":["a","b"],"targets":{"os":["linux"]},"risk":"high"}}"#;

async fn wait_for(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    path.exists()
}

#[cfg_attr(
    not(target_os = "linux"),
    ignore = "watcher latency test is only reliable on Linux"
)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_submission_is_normalized_and_ingested() {
    if std::env::var("SKIP_WATCH_FLOW").is_ok() {
        eprintln!("skipping watch_flow due to SKIP_WATCH_FLOW");
        return;
    }

    let temp = TempDir::new().expect("tempdir");
    let mut config = PipelineConfig::default();
    config.paths.data_root = temp.path().join("data");
    config.collection.dim = 16;
    config.batch_size = 2;
    config.watch.ready_wait_ms = 100;
    config.watch.debounce_ms = 200;
    let layout = config.layout();

    // Left over from an earlier run; picked up by the startup sweep.
    let leftover_dir = layout.datasets.join("web/xss");
    std::fs::create_dir_all(&leftover_dir).expect("datasets");
    std::fs::write(
        leftover_dir.join("old_v1.jsonl"),
        r#"{"id":"o-1","important":{"category":"web","sub_category":"xss"}}"#,
    )
    .expect("leftover");

    let store = FileCollectionStore::open(temp.path().join("vectors"))
        .await
        .expect("store");
    let ingestor = Ingestor::new(
        config.clone(),
        Arc::new(StubEmbedder::new("stub", 16)),
        Arc::new(store),
    )
    .expect("ingestor");
    let watcher = InboxWatcher::new(Normalizer::new(layout.clone()), ingestor, config.watch);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(watcher.run(async move {
        let _ = stop_rx.await;
    }));

    assert!(
        wait_for(&layout.checkpoints.join("old_v1.done"), Duration::from_secs(5)).await,
        "startup sweep did not ingest leftover file"
    );

    // Partial downloads are never dispatched.
    std::fs::write(layout.inbox.join("half.json.part"), SAMPLE).expect("write part");
    std::fs::write(layout.inbox.join("sample.json"), SAMPLE).expect("write submission");

    let dataset = layout.datasets.join("malware/ransomware/sample_x_v1.jsonl");
    assert!(
        wait_for(&layout.checkpoints.join("sample_x_v1.done"), Duration::from_secs(10)).await,
        "submission was not ingested in time"
    );
    assert!(dataset.exists());
    assert!(layout.inbox.join("half.json.part").exists());

    stop_tx.send(()).expect("stop watcher");
    let report: WatchReport = handle.await.expect("join").expect("watcher run");

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.normalize_failures, 0);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.ingest_failures, 0);
}
