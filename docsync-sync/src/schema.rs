//! `$jsonSchema` validators for synced collections.
//!
//! A validator that closes the document shape (`additionalProperties:
//! false`) must still admit the bookkeeping fields every upsert writes,
//! otherwise each sync would be rejected by the server.

use docsync_core::types::{Document, BOOKKEEPING_FIELDS};
use docsync_store::ValidatorOutcome;
use serde_json::Value;
use tracing::info;

use crate::error::SyncError;
use crate::pipeline::SyncEngine;

const JSON_SCHEMA: &str = "$jsonSchema";

/// Parse validator JSON. Accepts `{"$jsonSchema": {...}}` or a bare schema,
/// which is wrapped.
pub fn parse_validator(text: &str) -> Result<Document, SyncError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SyncError::InvalidValidator(format!("not valid JSON: {e}")))?;
    let Value::Object(mut validator) = value else {
        return Err(SyncError::InvalidValidator("expected a JSON object".into()));
    };
    if !validator.contains_key(JSON_SCHEMA) {
        let mut wrapped = Document::new();
        wrapped.insert(JSON_SCHEMA.into(), Value::Object(validator));
        validator = wrapped;
    }
    check_bookkeeping(&validator)?;
    Ok(validator)
}

fn check_bookkeeping(validator: &Document) -> Result<(), SyncError> {
    let Some(Value::Object(schema)) = validator.get(JSON_SCHEMA) else {
        return Err(SyncError::InvalidValidator(
            "`$jsonSchema` must be an object".into(),
        ));
    };
    if schema.get("additionalProperties") != Some(&Value::Bool(false)) {
        return Ok(());
    }
    let properties = schema.get("properties").and_then(Value::as_object);
    let missing: Vec<&str> = BOOKKEEPING_FIELDS
        .iter()
        .copied()
        .filter(|field| !properties.is_some_and(|p| p.contains_key(*field)))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(SyncError::InvalidValidator(format!(
        "schema forbids extra fields but does not declare {}",
        missing.join(", ")
    )))
}

impl SyncEngine {
    /// Install `validator` on `collection` (strict level, error action),
    /// creating the collection if needed.
    pub async fn apply_validator(
        &self,
        collection: &str,
        validator: &Document,
    ) -> Result<ValidatorOutcome, SyncError> {
        check_bookkeeping(validator)?;
        let handle = self.connector().resource(collection).await?;
        let outcome = handle.apply_validator(validator).await?;
        info!(collection = %handle.namespace(), ?outcome, "validator applied");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_schema_is_wrapped() {
        let validator = parse_validator(r#"{"bsonType": "object", "required": ["_id"]}"#).unwrap();
        assert_eq!(
            Value::Object(validator),
            json!({"$jsonSchema": {"bsonType": "object", "required": ["_id"]}})
        );
    }

    #[test]
    fn closed_schema_must_declare_bookkeeping_fields() {
        let closed = json!({"$jsonSchema": {
            "bsonType": "object",
            "properties": {"_id": {"bsonType": "int"}, "utime": {"bsonType": "string"}},
            "additionalProperties": false
        }});
        let err = parse_validator(&closed.to_string()).unwrap_err();
        assert!(err.to_string().contains("doc_hash, ctime"), "got: {err}");

        let complete = json!({"$jsonSchema": {
            "bsonType": "object",
            "properties": {
                "_id": {"bsonType": "int"},
                "doc_hash": {"bsonType": "string"},
                "utime": {"bsonType": "string"},
                "ctime": {"bsonType": "string"}
            },
            "additionalProperties": false
        }});
        parse_validator(&complete.to_string()).unwrap();
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            parse_validator("[1, 2]"),
            Err(SyncError::InvalidValidator(_))
        ));
        assert!(matches!(
            parse_validator("{not json"),
            Err(SyncError::InvalidValidator(_))
        ));
        assert!(matches!(
            parse_validator(r#"{"$jsonSchema": "object"}"#),
            Err(SyncError::InvalidValidator(_))
        ));
    }
}
