use std::path::{Path, PathBuf};

/// Directory layout under the data root.
///
/// ```text
/// <root>/inbox                 submissions
/// <root>/processed/staging     canonical JSONL being built
/// <root>/processed/errors      quarantined submissions (*.failed)
/// <root>/processed/archive     originals of committed submissions
/// <root>/datasets/<cat>/<sub>  dataset versions + MANIFEST.jsonl
/// <root>/logs                  daily journal
/// <root>/checkpoints           ingest checkpoint / lock markers
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub staging: PathBuf,
    pub errors: PathBuf,
    pub archive: PathBuf,
    pub datasets: PathBuf,
    pub logs: PathBuf,
    pub checkpoints: PathBuf,
}

impl DataLayout {
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let processed = root.join("processed");
        Self {
            inbox: root.join("inbox"),
            staging: processed.join("staging"),
            errors: processed.join("errors"),
            archive: processed.join("archive"),
            datasets: root.join("datasets"),
            logs: root.join("logs"),
            checkpoints: root.join("checkpoints"),
            root,
        }
    }

    #[must_use]
    pub fn with_checkpoints(mut self, dir: impl AsRef<Path>) -> Self {
        self.checkpoints = dir.as_ref().to_path_buf();
        self
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.inbox,
            &self.staging,
            &self.errors,
            &self.archive,
            &self.datasets,
            &self.logs,
            &self.checkpoints,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_root() {
        let layout = DataLayout::from_root("/srv/data");
        assert_eq!(layout.inbox, PathBuf::from("/srv/data/inbox"));
        assert_eq!(layout.staging, PathBuf::from("/srv/data/processed/staging"));
        assert_eq!(layout.errors, PathBuf::from("/srv/data/processed/errors"));
        assert_eq!(layout.datasets, PathBuf::from("/srv/data/datasets"));

        let moved = layout.with_checkpoints("/var/ckpt");
        assert_eq!(moved.checkpoints, PathBuf::from("/var/ckpt"));
    }
}
