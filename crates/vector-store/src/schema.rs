use attack_records::{CanonicalRecord, ScalarProjection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PRIMARY_KEY_FIELD: &str = "id";
pub const VECTOR_FIELD: &str = "embedding";
pub const RAW_FIELD: &str = "raw";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    VarChar { max_length: usize },
    FloatVector { dim: usize },
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub primary: bool,
}

impl FieldSpec {
    fn varchar(name: &str, max_length: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::VarChar { max_length },
            primary: false,
        }
    }
}

/// Column layout of an attack-pattern collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    /// The fixed column set: primary key, vector, denormalized scalars and the
    /// verbatim source record.
    #[must_use]
    pub fn attack_patterns(name: impl Into<String>, dim: usize) -> Self {
        let mut id = FieldSpec::varchar(PRIMARY_KEY_FIELD, 100);
        id.primary = true;
        Self {
            name: name.into(),
            description: "Attack patterns with embeddings and full JSON".to_string(),
            fields: vec![
                id,
                FieldSpec {
                    name: VECTOR_FIELD.to_string(),
                    kind: FieldKind::FloatVector { dim },
                    primary: false,
                },
                FieldSpec::varchar("title", 500),
                FieldSpec::varchar("category", 100),
                FieldSpec::varchar("sub_category", 100),
                FieldSpec::varchar("risk", 50),
                FieldSpec::varchar("tags", 1000),
                FieldSpec::varchar("os", 500),
                FieldSpec::varchar("system", 500),
                FieldSpec {
                    name: RAW_FIELD.to_string(),
                    kind: FieldKind::Json,
                    primary: false,
                },
            ],
        }
    }

    /// Dimension of the vector column, if the schema has one.
    #[must_use]
    pub fn vector_dim(&self) -> Option<usize> {
        self.fields.iter().find_map(|field| match field.kind {
            FieldKind::FloatVector { dim } => Some(dim),
            _ => None,
        })
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Vector index definition for the embedding column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub index_type: String,
    pub metric_type: String,
    #[serde(default)]
    pub params: Value,
}

/// One stored row: vector, scalar projection and the verbatim record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRow {
    pub id: String,
    pub embedding: Vec<f32>,
    pub title: String,
    pub category: String,
    pub sub_category: String,
    pub risk: String,
    pub tags: String,
    pub os: String,
    pub system: String,
    pub raw: Value,
}

impl PatternRow {
    #[must_use]
    pub fn new(projection: ScalarProjection, embedding: Vec<f32>, record: CanonicalRecord) -> Self {
        Self {
            id: projection.id,
            embedding,
            title: projection.title,
            category: projection.category,
            sub_category: projection.sub_category,
            risk: projection.risk,
            tags: projection.tags,
            os: projection.os,
            system: projection.system,
            raw: record.into_value(),
        }
    }
}
