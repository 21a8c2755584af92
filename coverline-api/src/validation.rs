//! Request body validation against compiled JSON Schemas.

use crate::error::{ApiError, ApiResult};
use coverline_core::ConfigError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Violations reported per rejected body.
const MAX_REPORTED_ERRORS: usize = 10;

/// A compiled JSON Schema for one route's request body.
pub struct RequestSchema {
    name: &'static str,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for RequestSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSchema").field("name", &self.name).finish()
    }
}

impl RequestSchema {
    /// Compile `schema`. The draft is taken from `$schema`, defaulting to 2020-12.
    pub fn new(name: &'static str, schema: &Value) -> Result<Self, ConfigError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| ConfigError::InvalidValue {
            field: "schema".to_string(),
            value: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { name, validator })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check `body` against the schema, reporting violations in `details`.
    pub fn validate(&self, body: &Value) -> ApiResult<()> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(body)
            .take(MAX_REPORTED_ERRORS)
            .map(|e| e.to_string())
            .collect();

        if violations.is_empty() {
            return Ok(());
        }
        Err(ApiError::validation_error(format!(
            "Request body does not match schema '{}'",
            self.name
        ))
        .with_details(serde_json::json!({ "violations": violations })))
    }
}

/// Parse a raw body as JSON. An empty body is `null`.
pub fn parse_json_body(bytes: &[u8]) -> ApiResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(ApiError::from)
}

/// Run the full validation stage: parse, check the optional schema, deserialize.
pub fn validate_body<B: DeserializeOwned>(
    bytes: &[u8],
    schema: Option<&RequestSchema>,
) -> ApiResult<B> {
    let value = parse_json_body(bytes)?;
    if let Some(schema) = schema {
        schema.validate(&value)?;
    }
    serde_json::from_value(value).map_err(|e| {
        ApiError::validation_error(format!("Request body has the wrong shape: {}", e))
    })
}
