use crate::error::{RecordError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A validated JSON object stored one-per-line in a dataset file.
///
/// The record is kept verbatim; accessors only read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord(Map<String, Value>);

impl CanonicalRecord {
    /// Wrap a JSON value, rejecting anything that is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Compact single-line JSON, the on-disk form inside a dataset file.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Nested lookup; `None` when a key is absent or an intermediate is not an object.
    #[must_use]
    pub fn get_in(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// Top-level `id` in string form. Strings are unquoted, other scalars use
    /// their JSON rendering, `null` counts as absent.
    #[must_use]
    pub fn record_id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn classification(&self) -> Result<Classification> {
        let category = self
            .get_in(&["important", "category"])
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingClassification)?;
        let sub_category = self
            .get_in(&["important", "sub_category"])
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingClassification)?;
        let title = self
            .get_in(&["important", "title"])
            .and_then(Value::as_str)
            .map(ToString::to_string);

        Ok(Classification {
            category: category.to_string(),
            sub_category: sub_category.to_string(),
            title,
        })
    }
}

/// Classification keys read from the first record of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub sub_category: String,
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            CanonicalRecord::from_value(json!([1, 2])),
            Err(RecordError::NotAnObject)
        ));
        assert!(CanonicalRecord::from_json_str("\"text\"").is_err());
    }

    #[test]
    fn get_in_stops_at_non_objects() {
        let record =
            CanonicalRecord::from_value(json!({"important": {"targets": ["linux"]}})).unwrap();
        assert!(record.get_in(&["important", "targets", "os"]).is_none());
        assert!(record.get_in(&["missing"]).is_none());
        assert!(record.get_in(&[]).is_none());
        assert_eq!(
            record.get_in(&["important", "targets"]),
            Some(&json!(["linux"]))
        );
    }

    #[test]
    fn classification_requires_category_and_sub_category() {
        let record =
            CanonicalRecord::from_value(json!({"important": {"category": "malware"}})).unwrap();
        assert!(matches!(
            record.classification(),
            Err(RecordError::MissingClassification)
        ));

        let record = CanonicalRecord::from_value(json!({
            "important": {"category": "malware", "sub_category": "ransomware"}
        }))
        .unwrap();
        assert_eq!(
            record.classification().unwrap(),
            Classification {
                category: "malware".into(),
                sub_category: "ransomware".into(),
                title: None,
            }
        );
    }

    #[test]
    fn record_id_renders_scalars() {
        let by_string = CanonicalRecord::from_value(json!({"id": "ap-1"})).unwrap();
        let by_number = CanonicalRecord::from_value(json!({"id": 42})).unwrap();
        let null_id = CanonicalRecord::from_value(json!({"id": null})).unwrap();

        assert_eq!(by_string.record_id().as_deref(), Some("ap-1"));
        assert_eq!(by_number.record_id().as_deref(), Some("42"));
        assert_eq!(null_id.record_id(), None);
    }
}
