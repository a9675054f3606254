use crate::error::{Result, VectorStoreError};
use crate::schema::{CollectionSchema, IndexSpec, PatternRow};
use crate::store::VectorStore;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SCHEMA_FILE_NAME: &str = "schema.json";
const INDEX_FILE_NAME: &str = "index.json";
const ROWS_FILE_NAME: &str = "rows.json";

/// Collections persisted as JSON under a directory, one sub-directory each.
///
/// ```text
/// <root>/<collection>/schema.json
/// <root>/<collection>/index.json
/// <root>/<collection>/rows.json    (id → row)
/// ```
pub struct FileCollectionStore {
    root: PathBuf,
    write_guard: Mutex<()>,
}

impl FileCollectionStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        log::info!("Opening file collection store at {}", root.display());
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_guard: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn schema(&self, name: &str) -> Result<CollectionSchema> {
        let path = self.collection_dir(name).join(SCHEMA_FILE_NAME);
        if !path.exists() {
            return Err(VectorStoreError::NotFound(name.to_string()));
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn index_spec(&self, name: &str) -> Result<Option<IndexSpec>> {
        let path = self.collection_dir(name).join(INDEX_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// All rows of a collection, ordered by id.
    pub async fn rows(&self, name: &str) -> Result<BTreeMap<String, PatternRow>> {
        let path = self.collection_dir(name).join(ROWS_FILE_NAME);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn len(&self, name: &str) -> Result<usize> {
        Ok(self.rows(name).await?.len())
    }

    pub async fn is_empty(&self, name: &str) -> Result<bool> {
        Ok(self.len(name).await? == 0)
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl VectorStore for FileCollectionStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collection_dir(name).join(SCHEMA_FILE_NAME).exists())
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let path = self.collection_dir(&schema.name).join(SCHEMA_FILE_NAME);
        if path.exists() {
            return Err(VectorStoreError::Store(format!(
                "collection '{}' already exists",
                schema.name
            )));
        }
        write_json_atomic(&path, schema).await
    }

    async fn collection_fields(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.schema(name).await?.field_names())
    }

    async fn has_index(&self, collection: &str, field: &str) -> Result<bool> {
        Ok(self
            .index_spec(collection)
            .await?
            .is_some_and(|spec| spec.field == field))
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let schema = self.schema(collection).await?;
        if !schema.field_names().iter().any(|name| name == &spec.field) {
            return Err(VectorStoreError::Store(format!(
                "collection '{collection}' has no field '{}'",
                spec.field
            )));
        }
        if self.index_spec(collection).await?.is_some() {
            return Err(VectorStoreError::Store(format!(
                "collection '{collection}' already has an index"
            )));
        }
        write_json_atomic(&self.collection_dir(collection).join(INDEX_FILE_NAME), spec).await
    }

    async fn upsert(&self, collection: &str, rows: Vec<PatternRow>) -> Result<usize> {
        let _guard = self.write_guard.lock().await;
        let schema = self.schema(collection).await?;
        if let Some(expected) = schema.vector_dim() {
            if let Some(bad) = rows.iter().find(|row| row.embedding.len() != expected) {
                return Err(VectorStoreError::InvalidDimension {
                    expected,
                    actual: bad.embedding.len(),
                });
            }
        }

        let mut stored = self.rows(collection).await?;
        let written = rows.len();
        for row in rows {
            if stored.contains_key(&row.id) {
                log::warn!("Replacing existing row '{}' in {collection}", row.id);
            }
            stored.insert(row.id.clone(), row);
        }
        write_json_atomic(&self.collection_dir(collection).join(ROWS_FILE_NAME), &stored).await?;
        log::debug!("Upserted {written} rows into {collection} (total {})", stored.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::VECTOR_FIELD;
    use serde_json::json;
    use tempfile::TempDir;

    fn row(id: &str, title: &str, dim: usize) -> PatternRow {
        PatternRow {
            id: id.to_string(),
            embedding: vec![0.5; dim],
            title: title.to_string(),
            category: "malware".into(),
            sub_category: "ransomware".into(),
            risk: String::new(),
            tags: String::new(),
            os: String::new(),
            system: String::new(),
            raw: json!({"id": id}),
        }
    }

    fn hnsw() -> IndexSpec {
        IndexSpec {
            field: VECTOR_FIELD.to_string(),
            index_type: "HNSW".into(),
            metric_type: "COSINE".into(),
            params: json!({"M": 16, "efConstruction": 200}),
        }
    }

    #[tokio::test]
    async fn create_collection_then_index() {
        let temp = TempDir::new().unwrap();
        let store = FileCollectionStore::open(temp.path()).await.unwrap();

        assert!(!store.has_collection("c").await.unwrap());
        store
            .create_collection(&CollectionSchema::attack_patterns("c", 4))
            .await
            .unwrap();
        assert!(store.has_collection("c").await.unwrap());
        assert!(store.create_collection(&CollectionSchema::attack_patterns("c", 4)).await.is_err());

        assert!(!store.has_index("c", VECTOR_FIELD).await.unwrap());
        store.create_index("c", &hnsw()).await.unwrap();
        assert!(store.has_index("c", VECTOR_FIELD).await.unwrap());
        assert!(store.create_index("c", &hnsw()).await.is_err());
    }

    #[tokio::test]
    async fn upsert_replaces_rows_by_id() {
        let temp = TempDir::new().unwrap();
        let store = FileCollectionStore::open(temp.path()).await.unwrap();
        store
            .create_collection(&CollectionSchema::attack_patterns("c", 4))
            .await
            .unwrap();

        store
            .upsert("c", vec![row("a", "first", 4), row("b", "other", 4)])
            .await
            .unwrap();
        store.upsert("c", vec![row("a", "second", 4)]).await.unwrap();

        let rows = store.rows("c").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["a"].title, "second");
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let temp = TempDir::new().unwrap();
        let store = FileCollectionStore::open(temp.path()).await.unwrap();
        store
            .create_collection(&CollectionSchema::attack_patterns("c", 4))
            .await
            .unwrap();

        let err = store.upsert("c", vec![row("a", "t", 3)]).await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 4,
                actual: 3
            }
        ));
        assert!(store.is_empty("c").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_into_missing_collection_fails() {
        let temp = TempDir::new().unwrap();
        let store = FileCollectionStore::open(temp.path()).await.unwrap();
        assert!(matches!(
            store.upsert("nope", vec![]).await,
            Err(VectorStoreError::NotFound(_))
        ));
    }
}
