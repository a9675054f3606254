use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Append-only daily operations log: `<dir>/<YYYY-MM-DD>.log`, one
/// `[HH:MM:SS] message` line per event.
///
/// Journal failures never fail the operation being journaled.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path_for(&self, at: &DateTime<Local>) -> PathBuf {
        self.dir.join(format!("{}.log", at.format("%Y-%m-%d")))
    }

    pub async fn record(&self, message: &str) {
        let now = Local::now();
        if let Err(err) = self.append(&now, message).await {
            log::warn!("Failed to write journal entry to {}: {err}", self.dir.display());
        }
    }

    async fn append(&self, at: &DateTime<Local>, message: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(at))
            .await?;
        file.write_all(format_line(at, message).as_bytes()).await?;
        file.flush().await
    }
}

fn format_line(at: &DateTime<Local>, message: &str) -> String {
    format!("[{}] {message}\n", at.format("%H:%M:%S"))
}
