//! JSON body parameters.

use serde_json::Value;
use tracing::{debug, warn};

use super::{ExtractionInput, ParamMap, ParamSource};

/// Merges a top-level JSON object body on write methods.
///
/// Only POST, PUT and PATCH carry parameter bodies. A body that is not
/// valid JSON, or whose top level is not an object, contributes nothing;
/// the request itself still proceeds.
pub struct BodySource;

fn is_write_method(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH"
    )
}

impl ParamSource for BodySource {
    fn name(&self) -> &'static str {
        "body"
    }

    fn extract(&self, input: &ExtractionInput<'_>, params: &mut ParamMap) {
        if input.body.is_empty() || !is_write_method(input.method) {
            return;
        }

        match serde_json::from_slice::<Value>(input.body) {
            Ok(Value::Object(fields)) => {
                for (key, value) in fields {
                    params.insert(key, value);
                }
            }
            Ok(other) => {
                debug!(
                    kind = json_kind(&other),
                    "Request body is not a JSON object, skipping body parameters"
                );
            }
            Err(e) => {
                warn!(error = %e, "Unparseable JSON body, skipping body parameters");
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
