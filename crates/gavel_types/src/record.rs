use crate::error::TypeError;
use crate::trace::Span;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One input record to evaluate. `id` is the stable identity used when
/// matching workflows across two runs; a UUIDv7 is generated when the caller
/// does not supply one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalRecord {
    pub id: String,

    pub context: Value,

    #[serde(default)]
    pub spans: Option<Vec<Span>>,
}

impl EvalRecord {
    pub fn new(context: Value) -> Result<Self, TypeError> {
        Self::with_id(Uuid::now_v7().to_string(), context)
    }

    pub fn with_id(id: impl Into<String>, context: Value) -> Result<Self, TypeError> {
        if !context.is_object() {
            return Err(TypeError::ContextMustBeObject);
        }

        Ok(Self {
            id: id.into(),
            context,
            spans: None,
        })
    }

    pub fn with_spans(mut self, spans: Vec<Span>) -> Self {
        self.spans = Some(spans);
        self
    }

    /// Produce a new record with `overrides` shallow-merged over the context
    /// at top-level keys. Identity is preserved so run comparison still
    /// matches the record.
    pub fn merged(&self, overrides: &Map<String, Value>) -> Self {
        let mut context = match &self.context {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("context".to_string(), other.clone());
                map
            }
        };

        for (key, value) in overrides {
            context.insert(key.clone(), value.clone());
        }

        Self {
            id: self.id.clone(),
            context: Value::Object(context),
            spans: self.spans.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_requires_object_context() {
        assert!(EvalRecord::new(json!(42)).is_err());
        assert!(EvalRecord::new(json!({"age": 20})).is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = EvalRecord::new(json!({})).unwrap();
        let b = EvalRecord::new(json!({})).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_merged_is_shallow_and_preserves_id() {
        let record = EvalRecord::with_id("r1", json!({"a": {"x": 1}, "b": 2})).unwrap();

        let mut overrides = Map::new();
        overrides.insert("a".to_string(), json!({"y": 3}));
        overrides.insert("c".to_string(), json!(4));

        let merged = record.merged(&overrides);
        assert_eq!(merged.id, "r1");
        assert_eq!(merged.context, json!({"a": {"y": 3}, "b": 2, "c": 4}));
        // original untouched
        assert_eq!(record.context, json!({"a": {"x": 1}, "b": 2}));
    }
}
