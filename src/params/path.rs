//! Path template variables.

use serde_json::Value;

use super::{ExtractionInput, ParamMap, ParamSource};

/// Binds the `{name}` variables captured by route matching.
pub struct PathSource;

impl ParamSource for PathSource {
    fn name(&self) -> &'static str {
        "path"
    }

    fn extract(&self, input: &ExtractionInput<'_>, params: &mut ParamMap) {
        for (name, value) in input.path_params {
            params.insert(name.clone(), Value::String(value.clone()));
        }
    }
}
