use crate::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const MANIFEST_FILE_NAME: &str = "MANIFEST.jsonl";

/// One line of a dataset folder's `MANIFEST.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub records: usize,
    pub moved_at: String,
}

#[must_use]
pub fn manifest_path(folder: &Path) -> PathBuf {
    folder.join(MANIFEST_FILE_NAME)
}

/// Append one entry for `file` (a name inside `folder`) stamped with the
/// current UTC time.
pub async fn append_manifest(folder: &Path, file: &str, records: usize) -> Result<ManifestEntry> {
    let entry = ManifestEntry {
        file: file.to_string(),
        records,
        moved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    };

    tokio::fs::create_dir_all(folder).await?;
    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');
    let mut out = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(manifest_path(folder))
        .await?;
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(entry)
}

/// Parsed entries in append order; unparsable lines are skipped with a warning.
pub async fn read_manifest(folder: &Path) -> Result<Vec<ManifestEntry>> {
    let path = manifest_path(folder);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = tokio::fs::read_to_string(&path).await?;
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => log::warn!(
                "Skipping manifest line {} in {}: {err}",
                idx + 1,
                path.display()
            ),
        }
    }
    Ok(entries)
}
