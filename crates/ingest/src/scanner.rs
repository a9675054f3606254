use crate::layout::DataLayout;
use crate::manifest::MANIFEST_FILE_NAME;
use crate::markers::{checkpoint_path, lock_path};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Dataset files with neither a checkpoint nor a lock, in path order.
pub fn pending_dataset_files(layout: &DataLayout) -> Vec<PathBuf> {
    if !layout.datasets.is_dir() {
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&layout.datasets).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Failed to read entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_dataset_file(entry.path()) {
            continue;
        }
        let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if checkpoint_path(&layout.checkpoints, stem).exists()
            || lock_path(&layout.checkpoints, stem).exists()
        {
            continue;
        }
        files.push(entry.into_path());
    }

    log::debug!("Found {} pending dataset files", files.len());
    files
}

fn is_dataset_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name != MANIFEST_FILE_NAME
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "jsonl")
}
