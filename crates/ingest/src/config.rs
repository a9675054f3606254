use crate::layout::DataLayout;
use crate::{IngestError, Result};
use attack_vector_store::{CollectionSchema, IndexSpec, VECTOR_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names the config file to load (any supported format).
pub const CONFIG_PATH_ENV: &str = "ATTACK_PIPELINE_CONFIG";
/// Overrides `embedder.mode` (`stub` | `http`).
pub const EMBEDDING_MODE_ENV: &str = "ATTACK_EMBEDDING_MODE";

const DEFAULT_CONFIG_REL: &str = "config/embedding.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_name: String,
    pub batch_size: usize,
    pub collection: CollectionConfig,
    pub paths: PathsConfig,
    pub embedder: EmbedderConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
    pub locks: LockConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            batch_size: 512,
            collection: CollectionConfig::default(),
            paths: PathsConfig::default(),
            embedder: EmbedderConfig::default(),
            store: StoreConfig::default(),
            watch: WatchConfig::default(),
            locks: LockConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub name: String,
    pub dim: usize,
    pub index_type: String,
    pub metric_type: String,
    pub index_params: Value,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: "attacks_v2".to_string(),
            dim: 384,
            index_type: "HNSW".to_string(),
            metric_type: "COSINE".to_string(),
            index_params: json!({"M": 16, "efConstruction": 200}),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    /// Defaults to `<data_root>/checkpoints`.
    pub checkpoints_root: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            checkpoints_root: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    Http,
    Stub,
}

impl EmbeddingMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stub" => Ok(Self::Stub),
            other => Err(IngestError::Config(format!(
                "Unsupported {EMBEDDING_MODE_ENV} '{other}' (expected 'http' or 'stub')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub mode: EmbeddingMode,
    /// Base URL of an OpenAI-compatible embeddings server.
    pub base_url: Option<String>,
    /// Environment variable holding the bearer key, if any.
    pub api_key_env: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Http,
            base_url: None,
            api_key_env: "ATTACK_EMBEDDING_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Milvus,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    /// Root of the file-backed store; defaults to `<data_root>/vectors`.
    pub dir: Option<PathBuf>,
    pub token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Milvus,
            host: "localhost".to_string(),
            port: 19530,
            dir: None,
            token_env: "MILVUS_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Pause between the two size probes of the readiness check.
    pub ready_wait_ms: u64,
    /// Minimum gap between two dispatches of the same path.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ready_wait_ms: 500,
            debounce_ms: 1200,
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub const fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which an unheld lock marker is considered abandoned.
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 3600,
        }
    }
}

impl PipelineConfig {
    /// Load from a file, choosing the parser by extension (YAML when unknown).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&raw, path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file: an explicit path, then `ATTACK_PIPELINE_CONFIG`,
    /// then `data/config/embedding.yaml`. Only the last may be absent, in which
    /// case defaults apply.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
            return Self::load(Path::new(&path));
        }

        let default_path = PathsConfig::default().data_root.join(DEFAULT_CONFIG_REL);
        if default_path.exists() {
            return Self::load(&default_path);
        }

        log::debug!(
            "No config at {}; using defaults",
            default_path.display()
        );
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let parsed = match ext.as_str() {
            "toml" => toml::from_str(raw).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
            _ => {
                // An empty YAML document deserializes as unit, not as a map.
                if raw.trim().is_empty() {
                    Ok(Self::default())
                } else {
                    serde_yaml::from_str(raw).map_err(|e| e.to_string())
                }
            }
        };
        parsed.map_err(|e| IngestError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = env::var(EMBEDDING_MODE_ENV) {
            if !raw.trim().is_empty() {
                self.embedder.mode = EmbeddingMode::parse(&raw)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be at least 1".into()));
        }
        if self.collection.dim == 0 {
            return Err(IngestError::Config("collection.dim must be at least 1".into()));
        }
        if self.collection.name.trim().is_empty() {
            return Err(IngestError::Config("collection.name must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn layout(&self) -> DataLayout {
        let layout = DataLayout::from_root(&self.paths.data_root);
        match &self.paths.checkpoints_root {
            Some(dir) => layout.with_checkpoints(dir),
            None => layout,
        }
    }

    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.store
            .dir
            .clone()
            .unwrap_or_else(|| self.paths.data_root.join("vectors"))
    }

    #[must_use]
    pub fn collection_schema(&self) -> CollectionSchema {
        CollectionSchema::attack_patterns(&self.collection.name, self.collection.dim)
    }

    #[must_use]
    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            field: VECTOR_FIELD.to_string(),
            index_type: self.collection.index_type.clone(),
            metric_type: self.collection.metric_type.clone(),
            params: self.collection.index_params.clone(),
        }
    }

    #[must_use]
    pub const fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.locks.stale_after_secs)
    }
}
