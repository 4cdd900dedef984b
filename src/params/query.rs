//! Query-string parameters.

use serde_json::Value;

use super::{ExtractionInput, ParamMap, ParamSource};

/// Decodes the query string.
///
/// A key that appears once becomes a string; a key that repeats becomes
/// an array holding every occurrence in order.
pub struct QuerySource;

impl ParamSource for QuerySource {
    fn name(&self) -> &'static str {
        "query"
    }

    fn extract(&self, input: &ExtractionInput<'_>, params: &mut ParamMap) {
        let Some(query) = input.query else {
            return;
        };

        // First occurrence replaces whatever an earlier source bound;
        // repeats within the query itself accumulate into an array.
        let mut seen: Vec<String> = Vec::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let key = key.into_owned();
            let value = Value::String(value.into_owned());

            if seen.contains(&key) {
                match params.remove(&key) {
                    Some(Value::Array(mut items)) => {
                        items.push(value);
                        params.insert(key, Value::Array(items));
                    }
                    Some(prev) => {
                        params.insert(key, Value::Array(vec![prev, value]));
                    }
                    None => params.insert(key, value),
                }
            } else {
                seen.push(key.clone());
                params.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(query: &str) -> ParamMap {
        let input = ExtractionInput {
            query: Some(query),
            ..ExtractionInput::default()
        };
        let mut params = ParamMap::new();
        QuerySource.extract(&input, &mut params);
        params
    }

    #[test]
    fn single_values_become_strings() {
        let params = run("page=2&sort=desc");
        assert_eq!(params.get("page"), Some(&json!("2")));
        assert_eq!(params.get("sort"), Some(&json!("desc")));
    }

    #[test]
    fn repeated_keys_become_arrays_in_order() {
        let params = run("tag=a&tag=b&tag=c");
        assert_eq!(params.get("tag"), Some(&json!(["a", "b", "c"])));
    }

    #[test]
    fn percent_encoding_is_decoded() {
        let params = run("q=hello%20world&path=a%2Fb");
        assert_eq!(params.get("q"), Some(&json!("hello world")));
        assert_eq!(params.get("path"), Some(&json!("a/b")));
    }

    #[test]
    fn repeated_query_key_does_not_absorb_a_path_binding() {
        let path_params = vec![("tag".to_string(), "from-path".to_string())];
        let input = ExtractionInput {
            path_params: &path_params,
            query: Some("tag=a&tag=b"),
            ..ExtractionInput::default()
        };

        let mut params = ParamMap::new();
        super::super::PathSource.extract(&input, &mut params);
        QuerySource.extract(&input, &mut params);

        assert_eq!(params.get("tag"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn empty_query_extracts_nothing() {
        assert!(run("").is_empty());
    }

    #[test]
    fn decodes_whatever_a_standard_encoder_produces() {
        let encoded = serde_urlencoded::to_string([
            ("name", "Ada Lovelace"),
            ("filter", "status=active&tier>1"),
            ("note", "100%"),
        ])
        .unwrap();

        let params = run(&encoded);
        assert_eq!(params.get("name"), Some(&json!("Ada Lovelace")));
        assert_eq!(params.get("filter"), Some(&json!("status=active&tier>1")));
        assert_eq!(params.get("note"), Some(&json!("100%")));
    }
}
