use crate::record::CanonicalRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record paths that feed the embedding text, in output order.
pub const EMBEDDING_FIELDS: [&[&str]; 7] = [
    &["important", "title"],
    &["important", "category"],
    &["important", "sub_category"],
    &["important", "tags"],
    &["important", "targets", "os"],
    &["important", "targets", "system"],
    &["important", "risk"],
];

/// Render a record value as text.
///
/// - `None` / `null` → empty string
/// - array → non-null elements rendered and joined with single spaces, in order
/// - string → the string itself
/// - anything else → compact JSON (`true`, `3`, `1.0`, `{"k":1}`)
///
/// Every list-valued column and the embedding text go through this function,
/// so changing how a scalar renders changes every stored embedding.
#[must_use]
pub fn join_scalars(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic embedding input for a record.
#[must_use]
pub fn embedding_text(record: &CanonicalRecord) -> String {
    EMBEDDING_FIELDS
        .iter()
        .map(|path| join_scalars(record.get_in(path)))
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Denormalized scalar columns stored alongside each vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarProjection {
    pub id: String,
    pub title: String,
    pub category: String,
    pub sub_category: String,
    pub risk: String,
    pub tags: String,
    pub os: String,
    pub system: String,
}

impl ScalarProjection {
    /// Project a record; `fallback_id` is used when the record carries no `id`.
    #[must_use]
    pub fn from_record(record: &CanonicalRecord, fallback_id: impl FnOnce() -> String) -> Self {
        let field = |path: &[&str]| join_scalars(record.get_in(path));
        Self {
            id: record.record_id().unwrap_or_else(fallback_id),
            title: field(&["important", "title"]),
            category: field(&["important", "category"]),
            sub_category: field(&["important", "sub_category"]),
            risk: field(&["important", "risk"]),
            tags: field(&["important", "tags"]),
            os: field(&["important", "targets", "os"]),
            system: field(&["important", "targets", "system"]),
        }
    }
}
