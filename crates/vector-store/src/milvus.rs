//! Milvus v2 RESTful API client.
//!
//! Every endpoint is a `POST` with a JSON body and answers
//! `{"code": 0, "data": ...}` on success; any other code carries a `message`.
use crate::error::{Result, VectorStoreError};
use crate::schema::{CollectionSchema, FieldKind, IndexSpec, PatternRow};
use crate::store::VectorStore;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub struct MilvusRestStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl MilvusRestStore {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}"),
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, endpoint: &str, body: Value) -> Result<Value> {
        let url = format!("{}/v2/vectordb/{endpoint}", self.base_url);
        log::debug!("Milvus request {url}");
        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VectorStoreError::Store(format!(
                "{endpoint} returned HTTP {status}: {text}"
            )));
        }
        let parsed: ApiResponse = resp.json().await?;
        if parsed.code != 0 {
            return Err(VectorStoreError::Store(format!(
                "{endpoint} failed (code {}): {}",
                parsed.code,
                parsed.message.unwrap_or_default()
            )));
        }
        Ok(parsed.data)
    }
}

fn field_json(field: &crate::schema::FieldSpec) -> Value {
    let mut out = Map::new();
    out.insert("fieldName".into(), json!(field.name));
    match field.kind {
        FieldKind::VarChar { max_length } => {
            out.insert("dataType".into(), json!("VarChar"));
            out.insert(
                "elementTypeParams".into(),
                json!({ "max_length": max_length }),
            );
        }
        FieldKind::FloatVector { dim } => {
            out.insert("dataType".into(), json!("FloatVector"));
            out.insert("elementTypeParams".into(), json!({ "dim": dim }));
        }
        FieldKind::Json => {
            out.insert("dataType".into(), json!("JSON"));
        }
    }
    if field.primary {
        out.insert("isPrimary".into(), json!(true));
    }
    Value::Object(out)
}

fn create_collection_body(schema: &CollectionSchema) -> Value {
    json!({
        "collectionName": schema.name,
        "description": schema.description,
        "schema": {
            "autoId": false,
            "enableDynamicField": true,
            "fields": schema.fields.iter().map(field_json).collect::<Vec<_>>(),
        }
    })
}

fn create_index_body(collection: &str, spec: &IndexSpec) -> Value {
    let mut params = match &spec.params {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    params.insert("index_type".into(), json!(spec.index_type));
    json!({
        "collectionName": collection,
        "indexParams": [{
            "fieldName": spec.field,
            "indexName": spec.field,
            "metricType": spec.metric_type,
            "params": params,
        }]
    })
}

#[async_trait]
impl VectorStore for MilvusRestStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        let data = self
            .call("collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.call("collections/create", create_collection_body(schema))
            .await
            .map(|_| ())
    }

    async fn collection_fields(&self, name: &str) -> Result<Vec<String>> {
        let data = self
            .call("collections/describe", json!({ "collectionName": name }))
            .await?;
        Ok(data
            .get("fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn has_index(&self, collection: &str, field: &str) -> Result<bool> {
        let data = self
            .call(
                "indexes/list",
                json!({ "collectionName": collection, "fieldName": field }),
            )
            .await?;
        Ok(data.as_array().is_some_and(|names| !names.is_empty()))
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        self.call("indexes/create", create_index_body(collection, spec))
            .await
            .map(|_| ())
    }

    async fn upsert(&self, collection: &str, rows: Vec<PatternRow>) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        let data = self
            .call(
                "entities/upsert",
                json!({ "collectionName": collection, "data": rows }),
            )
            .await?;
        Ok(data
            .get("upsertCount")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collection_body_maps_field_kinds() {
        let schema = CollectionSchema::attack_patterns("attacks_v2", 384);
        let body = create_collection_body(&schema);
        let fields = body["schema"]["fields"].as_array().unwrap();

        assert_eq!(body["collectionName"], "attacks_v2");
        assert_eq!(
            fields[0],
            json!({"fieldName": "id", "dataType": "VarChar", "elementTypeParams": {"max_length": 100}, "isPrimary": true})
        );
        assert_eq!(
            fields[1],
            json!({"fieldName": "embedding", "dataType": "FloatVector", "elementTypeParams": {"dim": 384}})
        );
        assert_eq!(fields[9], json!({"fieldName": "raw", "dataType": "JSON"}));
    }

    #[test]
    fn index_body_merges_params() {
        let spec = IndexSpec {
            field: "embedding".into(),
            index_type: "HNSW".into(),
            metric_type: "COSINE".into(),
            params: json!({"M": 16, "efConstruction": 200}),
        };
        let body = create_index_body("attacks_v2", &spec);
        assert_eq!(
            body["indexParams"][0]["params"],
            json!({"M": 16, "efConstruction": 200, "index_type": "HNSW"})
        );
        assert_eq!(body["indexParams"][0]["metricType"], "COSINE");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_dependency_failure() {
        let store = MilvusRestStore::new("127.0.0.1", 9);
        let err = store.has_collection("c").await.unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");
    }
}
