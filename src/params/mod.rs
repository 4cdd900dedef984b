//! Parameter extraction.
//!
//! Admitted requests for http and rpc backends carry parameters in three
//! places: the matched path template, the query string, and (for write
//! methods) a JSON body. Extraction flattens them into one ordered
//! [`ParamMap`] the dispatcher can hand to the backend.
//!
//! Sources run as a fixed chain with explicit precedence: path, then
//! query, then body. A later source overwrites an earlier one on key
//! collision.

mod body;
mod path;
mod query;

pub use body::BodySource;
pub use path::PathSource;
pub use query::QuerySource;

use serde_json::Value;

/// The pieces of a request that parameters are pulled from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionInput<'a> {
    /// HTTP method of the inbound request.
    pub method: &'a str,
    /// Variables bound by the matched path template.
    pub path_params: &'a [(String, String)],
    /// Raw query string, without the leading `?`.
    pub query: Option<&'a str>,
    /// Buffered request body; empty when the request had none.
    pub body: &'a [u8],
}

/// One place parameters come from.
pub trait ParamSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &'static str;

    /// Pull this source's parameters into `params`.
    ///
    /// Sources never fail the request; malformed input is logged and
    /// skipped.
    fn extract(&self, input: &ExtractionInput<'_>, params: &mut ParamMap);
}

/// Ordered key/value parameters, insertion order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    entries: Vec<(String, Value)>,
}

impl ParamMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key`, replacing any existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove and return a parameter.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a JSON object, insertion order preserved.
    #[must_use]
    pub fn to_object(&self) -> serde_json::Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Run the full extraction chain over `input`.
#[must_use]
pub fn extract_params(input: &ExtractionInput<'_>) -> ParamMap {
    let sources: [&dyn ParamSource; 3] = [&PathSource, &QuerySource, &BodySource];
    let mut params = ParamMap::new();
    for source in sources {
        source.extract(input, &mut params);
    }
    params
}
