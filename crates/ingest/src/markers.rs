use crate::{IngestError, Result};
use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CHECKPOINT_EXTENSION: &str = "done";
const LOCK_EXTENSION: &str = "lock";

/// Written once a dataset file is fully ingested; presence means "do not
/// re-ingest".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source_file: String,
    pub collection_name: String,
    pub records_ingested: usize,
    pub model_name: String,
    pub vector_dim: usize,
    pub ingested_at: String,
}

impl Checkpoint {
    pub fn now(
        source_file: &Path,
        collection_name: impl Into<String>,
        records_ingested: usize,
        model_name: impl Into<String>,
        vector_dim: usize,
    ) -> Self {
        Self {
            source_file: source_file.display().to_string(),
            collection_name: collection_name.into(),
            records_ingested,
            model_name: model_name.into(),
            vector_dim,
            ingested_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[must_use]
pub fn checkpoint_path(root: &Path, stem: &str) -> PathBuf {
    root.join(format!("{stem}.{CHECKPOINT_EXTENSION}"))
}

#[must_use]
pub fn lock_path(root: &Path, stem: &str) -> PathBuf {
    root.join(format!("{stem}.{LOCK_EXTENSION}"))
}

pub async fn read_checkpoint(root: &Path, stem: &str) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(root, stem);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Pretty JSON to `<stem>.done.tmp`, then rename over `<stem>.done`.
pub async fn write_checkpoint(root: &Path, stem: &str, checkpoint: &Checkpoint) -> Result<PathBuf> {
    tokio::fs::create_dir_all(root).await?;
    let path = checkpoint_path(root, stem);
    let tmp = path.with_extension(format!("{CHECKPOINT_EXTENSION}.tmp"));
    let bytes = serde_json::to_vec_pretty(checkpoint)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    acquired_at_unix_ms: u64,
}

#[derive(Debug)]
pub enum LockAttempt {
    Acquired(IngestLock),
    Held { path: PathBuf },
}

/// Exclusive claim on one dataset stem. The marker file exists exactly while
/// the guard is alive; dropping it unlocks and deletes the marker.
#[derive(Debug)]
pub struct IngestLock {
    file: File,
    path: PathBuf,
}

impl IngestLock {
    pub async fn try_acquire(root: &Path, stem: &str, stale_after: Duration) -> Result<LockAttempt> {
        tokio::fs::create_dir_all(root).await?;
        let path = lock_path(root, stem);
        tokio::task::spawn_blocking(move || acquire_blocking(path, stale_after))
            .await
            .map_err(|err| IngestError::Other(format!("join lock task: {err}")))?
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        remove_marker(&self.path);
        let _ = self.file.unlock();
    }
}

fn acquire_blocking(path: PathBuf, stale_after: Duration) -> Result<LockAttempt> {
    // Second pass only after a stale marker was removed.
    for _ in 0..2 {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return claim_created(file, path),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if !reclaim_if_stale(&path, stale_after)? {
                    return Ok(LockAttempt::Held { path });
                }
            }
            Err(err) => {
                return Err(IngestError::Other(format!(
                    "create lock {}: {err}",
                    path.display()
                )))
            }
        }
    }
    Ok(LockAttempt::Held { path })
}

/// Lock a marker this process just created. A reclaimer may hold its advisory
/// lock for a moment, so wait for it, then make sure the marker is still the
/// file at `path` before claiming it.
fn claim_created(mut file: File, path: PathBuf) -> Result<LockAttempt> {
    if let Err(err) = file.lock_exclusive() {
        if is_current_marker(&file, &path).unwrap_or(false) {
            remove_marker(&path);
        }
        return Err(err.into());
    }
    if !is_current_marker(&file, &path)? {
        let _ = file.unlock();
        return Ok(LockAttempt::Held { path });
    }
    if let Err(err) = write_payload(&mut file) {
        remove_marker(&path);
        let _ = file.unlock();
        return Err(err);
    }
    Ok(LockAttempt::Acquired(IngestLock { file, path }))
}

fn write_payload(file: &mut File) -> Result<()> {
    let payload = LockPayload {
        pid: std::process::id(),
        acquired_at_unix_ms: unix_ms(SystemTime::now()),
    };
    file.write_all(&serde_json::to_vec(&payload)?)?;
    file.sync_all()?;
    Ok(())
}

fn remove_marker(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != ErrorKind::NotFound {
            log::warn!("Failed to remove lock {}: {err}", path.display());
        }
    }
}

/// Whether `file` is still the marker at `path` (not removed or replaced).
fn is_current_marker(file: &File, path: &Path) -> std::io::Result<bool> {
    let on_disk = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    Ok(same_file(&file.metadata()?, &on_disk))
}

#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    a.len() == b.len()
        && a.modified().ok() == b.modified().ok()
        && a.created().ok() == b.created().ok()
}

/// Remove an abandoned marker: nobody holds its advisory lock, it is still
/// the file at `path`, and it is older than `stale_after`. Returns whether
/// the marker was removed.
fn reclaim_if_stale(path: &Path, stale_after: Duration) -> Result<bool> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        // Released between our create attempt and now.
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err.into()),
    };
    if file.try_lock_exclusive().is_err() {
        return Ok(false);
    }
    // Only a holder of this marker's lock may remove it; a replaced marker
    // belongs to someone else.
    let result = match is_current_marker(&file, path) {
        Ok(true) => remove_if_stale(&mut file, path, stale_after),
        Ok(false) => Ok(false),
        Err(err) => Err(err.into()),
    };
    let _ = file.unlock();
    result
}

fn remove_if_stale(file: &mut File, path: &Path, stale_after: Duration) -> Result<bool> {
    let age = marker_age(file)?;
    if age < stale_after {
        return Ok(false);
    }
    log::warn!(
        "Reclaiming stale lock {} (age {}s)",
        path.display(),
        age.as_secs()
    );
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err.into()),
    }
}

fn marker_age(file: &mut File) -> Result<Duration> {
    let mut raw = String::new();
    let acquired_at = match file.read_to_string(&mut raw) {
        Ok(_) => serde_json::from_str::<LockPayload>(&raw)
            .ok()
            .map(|payload| UNIX_EPOCH + Duration::from_millis(payload.acquired_at_unix_ms)),
        Err(_) => None,
    };
    let acquired_at = match acquired_at {
        Some(at) => at,
        None => file.metadata()?.modified()?,
    };
    Ok(SystemTime::now()
        .duration_since(acquired_at)
        .unwrap_or(Duration::ZERO))
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn checkpoint_round_trip_is_atomic() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_checkpoint(temp.path(), "x_v1").await.unwrap(), None);

        let checkpoint = Checkpoint::now(Path::new("data/x_v1.jsonl"), "attacks_v2", 5, "m", 8);
        let path = write_checkpoint(temp.path(), "x_v1", &checkpoint).await.unwrap();

        assert_eq!(path, temp.path().join("x_v1.done"));
        assert!(!temp.path().join("x_v1.done.tmp").exists());
        assert_eq!(
            read_checkpoint(temp.path(), "x_v1").await.unwrap(),
            Some(checkpoint)
        );
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\n  \"records_ingested\": 5"));
    }

    #[tokio::test]
    async fn lock_is_exclusive_and_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let first = IngestLock::try_acquire(temp.path(), "x_v1", HOUR).await.unwrap();
        let LockAttempt::Acquired(guard) = first else {
            panic!("expected to acquire");
        };
        assert!(guard.path().exists());

        // A live holder is never reclaimed, even with a zero staleness window.
        let second = IngestLock::try_acquire(temp.path(), "x_v1", Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(second, LockAttempt::Held { .. }));

        let path = guard.path().to_path_buf();
        drop(guard);
        assert!(!path.exists());

        let third = IngestLock::try_acquire(temp.path(), "x_v1", HOUR).await.unwrap();
        assert!(matches!(third, LockAttempt::Acquired(_)));
    }

    #[tokio::test]
    async fn fresh_unheld_marker_is_respected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(lock_path(temp.path(), "x_v1"), "lock").unwrap();

        let attempt = IngestLock::try_acquire(temp.path(), "x_v1", HOUR).await.unwrap();
        assert!(matches!(attempt, LockAttempt::Held { .. }));
        assert!(lock_path(temp.path(), "x_v1").exists());
    }

    #[test]
    fn replaced_marker_is_not_current() {
        let temp = TempDir::new().unwrap();
        let path = lock_path(temp.path(), "x_v1");
        std::fs::write(&path, "old").unwrap();
        let old = File::open(&path).unwrap();
        assert!(is_current_marker(&old, &path).unwrap());

        std::fs::remove_file(&path).unwrap();
        assert!(!is_current_marker(&old, &path).unwrap());

        std::fs::write(&path, "new").unwrap();
        assert!(!is_current_marker(&old, &path).unwrap());
    }

    #[test]
    fn racing_reclaimers_never_share_the_lock() {
        let temp = TempDir::new().unwrap();
        let path = lock_path(temp.path(), "x_v1");
        let holders = Arc::new(AtomicUsize::new(0));
        let max_holders = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let holders = Arc::clone(&holders);
                let max_holders = Arc::clone(&max_holders);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        // Zero staleness: every unheld marker is reclaimable.
                        let attempt = acquire_blocking(path.clone(), Duration::ZERO).unwrap();
                        if let LockAttempt::Acquired(guard) = attempt {
                            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                            max_holders.fetch_max(now, Ordering::SeqCst);
                            std::thread::yield_now();
                            holders.fetch_sub(1, Ordering::SeqCst);
                            drop(guard);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(max_holders.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn abandoned_marker_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let payload = LockPayload {
            pid: 1,
            acquired_at_unix_ms: unix_ms(SystemTime::now()) - 2 * 3_600_000,
        };
        std::fs::write(
            lock_path(temp.path(), "x_v1"),
            serde_json::to_vec(&payload).unwrap(),
        )
        .unwrap();

        let attempt = IngestLock::try_acquire(temp.path(), "x_v1", HOUR).await.unwrap();
        let LockAttempt::Acquired(guard) = attempt else {
            panic!("stale lock should be reclaimed");
        };
        let raw = std::fs::read_to_string(guard.path()).unwrap();
        let fresh: LockPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(fresh.pid, std::process::id());
    }
}
