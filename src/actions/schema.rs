//! Payload validation behind a small validator seam.
//!
//! The registry only depends on [`InputValidator`]; the default
//! implementation compiles a JSON Schema once at registration time and
//! reports every violation with its field path, combined into a single
//! message the way operators see it in job error records.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::error::ActionError;

/// Validates an untyped payload, rejecting with a structured error.
pub trait InputValidator: Send + Sync {
    fn validate(&self, input: &Value) -> Result<(), ActionError>;
}

/// JSON Schema validator (draft 7).
pub struct JsonSchemaValidator {
    compiled: JSONSchema,
}

impl JsonSchemaValidator {
    pub fn new(schema: &Value) -> Result<Self, ActionError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| ActionError::Validation(format!("invalid input schema: {e}")))?;
        Ok(Self { compiled })
    }
}

impl InputValidator for JsonSchemaValidator {
    fn validate(&self, input: &Value) -> Result<(), ActionError> {
        let messages: Vec<String> = match self.compiled.validate(input) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{path}: {error}")
                    }
                })
                .collect(),
        };

        let message = if messages.len() == 1 {
            messages.into_iter().next().unwrap_or_default()
        } else {
            format!("{} validation errors: {}", messages.len(), messages.join("; "))
        };
        Err(ActionError::Validation(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> JsonSchemaValidator {
        JsonSchemaValidator::new(&json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number", "minimum": 0},
                "currency": {"type": "string"}
            },
            "required": ["amount", "currency"]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_payload_passes() {
        let v = validator();
        assert!(v.validate(&json!({"amount": 10.0, "currency": "USD"})).is_ok());
    }

    #[test]
    fn test_single_violation_message() {
        let v = validator();
        let err = v
            .validate(&json!({"amount": -5, "currency": "USD"}))
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("/amount"), "message: {err}");
    }

    #[test]
    fn test_multiple_violations_are_combined() {
        let v = validator();
        let err = v.validate(&json!({})).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2 validation errors"), "message: {message}");
        assert!(message.contains("amount"), "message: {message}");
        assert!(message.contains("currency"), "message: {message}");
    }

    #[test]
    fn test_invalid_schema_rejected_at_compile() {
        let result = JsonSchemaValidator::new(&json!({"type": "not-a-type"}));
        assert!(result.is_err());
    }
}
