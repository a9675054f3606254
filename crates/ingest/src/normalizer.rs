use crate::journal::Journal;
use crate::layout::DataLayout;
use crate::manifest::append_manifest;
use crate::stats::NormalizeOutcome;
use crate::{IngestError, Result};
use attack_records::{slug_for, CanonicalRecord};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// Turns inbox submissions into versioned dataset files.
#[derive(Debug, Clone)]
pub struct Normalizer {
    layout: DataLayout,
    journal: Journal,
}

/// Canonical lines written to staging, plus the record used for classification.
struct Staged {
    records: usize,
    first: Option<CanonicalRecord>,
}

impl Normalizer {
    pub fn new(layout: DataLayout) -> Self {
        let journal = Journal::new(&layout.logs);
        Self { layout, journal }
    }

    #[must_use]
    pub const fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Normalize one submission. On failure the staging output is removed, the
    /// submission is quarantined as `errors/<name>.failed` and the error is
    /// returned.
    pub async fn normalize(&self, source: &Path) -> Result<NormalizeOutcome> {
        if !source.is_file() {
            return Err(IngestError::NotFound(source.to_path_buf()));
        }
        let name = file_name(source)?;
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&name)
            .to_string();
        let staging = self.layout.staging.join(format!("{stem}.jsonl"));

        match self.commit(source, &name, &staging).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.quarantine(source, &name, &staging).await;
                self.journal
                    .record(&format!("ERROR processing {name}: {err}"))
                    .await;
                log::error!("Failed to normalize {}: {err}", source.display());
                Err(err)
            }
        }
    }

    async fn commit(&self, source: &Path, name: &str, staging: &Path) -> Result<NormalizeOutcome> {
        fs::create_dir_all(&self.layout.staging).await?;
        let staged = if is_jsonl(source) {
            stage_jsonl(source, staging).await?
        } else {
            stage_document(source, staging).await?
        };

        let first = staged
            .first
            .ok_or_else(|| IngestError::Classification("no records to classify".into()))?;
        let classification = first
            .classification()
            .map_err(|err| IngestError::Classification(err.to_string()))?;
        let category = folder_component(&classification.category, "category")?;
        let sub_category = folder_component(&classification.sub_category, "sub_category")?;

        let folder = self.layout.datasets.join(category).join(sub_category);
        fs::create_dir_all(&folder).await?;
        let slug = slug_for(&classification);
        let version = next_version(&folder, &slug).await?;
        let file = format!("{slug}_v{version}.jsonl");
        let destination = folder.join(&file);

        move_file(staging, &destination).await?;
        append_manifest(&folder, &file, staged.records).await?;

        let archived = self.layout.archive.join(name);
        if let Err(err) = move_file(source, &archived).await {
            log::warn!(
                "Committed {} but could not archive {}: {err}",
                destination.display(),
                source.display()
            );
        }

        self.journal
            .record(&format!(
                "Moved inbox/{name} → datasets/{category}/{sub_category}/{file} (records={})",
                staged.records
            ))
            .await;
        log::info!(
            "Normalized {} → {} ({} records)",
            source.display(),
            destination.display(),
            staged.records
        );

        Ok(NormalizeOutcome {
            source: source.to_path_buf(),
            destination,
            category: classification.category,
            sub_category: classification.sub_category,
            slug,
            version,
            records: staged.records,
        })
    }

    async fn quarantine(&self, source: &Path, name: &str, staging: &Path) {
        if let Err(err) = fs::remove_file(staging).await {
            if err.kind() != ErrorKind::NotFound {
                log::warn!("Failed to remove staging file {}: {err}", staging.display());
            }
        }
        let failed = self.layout.errors.join(format!("{name}.failed"));
        match move_file(source, &failed).await {
            Ok(()) => log::warn!("Quarantined {} as {}", source.display(), failed.display()),
            Err(err) => log::warn!("Failed to quarantine {}: {err}", source.display()),
        }
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| IngestError::InvalidPath(path.display().to_string()))
}

fn is_jsonl(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"))
}

/// Classification values become directory names; they must stay one level deep.
fn folder_component<'a>(value: &'a str, key: &str) -> Result<&'a str> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\']) => Ok(value),
        _ => Err(IngestError::Classification(format!(
            "important.{key} '{value}' is not usable as a folder name"
        ))),
    }
}

async fn write_record(out: &mut BufWriter<fs::File>, record: &CanonicalRecord) -> Result<()> {
    let mut line = record.to_json_line();
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn stage_jsonl(source: &Path, staging: &Path) -> Result<Staged> {
    let mut lines = BufReader::new(fs::File::open(source).await?).lines();
    let mut out = BufWriter::new(fs::File::create(staging).await?);
    let mut staged = Staged {
        records: 0,
        first: None,
    };
    let mut line_no = 0usize;

    loop {
        let next = lines.next_line().await.map_err(|err| {
            if err.kind() == ErrorKind::InvalidData {
                IngestError::Validation(format!(
                    "Invalid JSONL line {}: not valid UTF-8",
                    line_no + 1
                ))
            } else {
                err.into()
            }
        })?;
        let Some(line) = next else { break };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(trimmed).map_err(|err| {
            IngestError::Validation(format!("Invalid JSONL line {line_no}: {err}"))
        })?;
        let record = CanonicalRecord::from_value(value).map_err(|_| {
            IngestError::Validation(format!("Invalid JSONL line {line_no}: not a JSON object"))
        })?;

        write_record(&mut out, &record).await?;
        staged.records += 1;
        if staged.first.is_none() {
            staged.first = Some(record);
        }
    }
    out.flush().await?;

    if staged.records == 0 {
        return Err(IngestError::Validation("no records".into()));
    }
    Ok(staged)
}

async fn stage_document(source: &Path, staging: &Path) -> Result<Staged> {
    let bytes = fs::read(source).await?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|err| IngestError::Validation(format!("Invalid JSON: {err}")))?;

    let records = match value {
        Value::Object(map) => vec![CanonicalRecord::from_value(Value::Object(map))
            .map_err(|err| IngestError::Validation(err.to_string()))?],
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                CanonicalRecord::from_value(item).map_err(|_| {
                    IngestError::Validation(format!("Array element {idx} is not a JSON object"))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        _ => {
            return Err(IngestError::Validation(
                "Top-level JSON must be an object or an array of objects".into(),
            ))
        }
    };

    let mut out = BufWriter::new(fs::File::create(staging).await?);
    for record in &records {
        write_record(&mut out, record).await?;
    }
    out.flush().await?;

    Ok(Staged {
        records: records.len(),
        first: records.into_iter().next(),
    })
}

/// `max(N) + 1` over `<slug>_v<N>.jsonl` in `folder`, or 1.
pub async fn next_version(folder: &Path, slug: &str) -> Result<u32> {
    let prefix = format!("{slug}_v");
    let mut max = 0u32;
    let mut entries = match fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(1),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let version = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u32>().ok());
        if let Some(version) = version {
            max = max.max(version);
        }
    }
    Ok(max + 1)
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            let partial: PathBuf = to.with_extension("partial");
            fs::copy(from, &partial).await?;
            fs::rename(&partial, to).await?;
            fs::remove_file(from).await
        }
        Err(err) => Err(err),
    }
}
