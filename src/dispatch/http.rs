//! HTTP upstream forwarding.

use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tracing::warn;

use super::ResponseEnvelope;
use crate::auth::{APP_KEY_HEADER, Identity};
use crate::params::ParamMap;
use crate::{Error, Result};

/// Header carrying the authenticated user id to the upstream.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's tenant to the upstream.
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
/// Header carrying the user's roles, comma-joined.
pub const ROLES_HEADER: &str = "x-roles";

/// Forwards requests to http upstreams.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Forward a request and wrap the upstream's answer in an envelope.
    ///
    /// Path variables are consumed from `params`; what remains travels as
    /// the query string on read methods and as a JSON body on writes. The
    /// upstream's non-2xx statuses surface as [`Error::UpstreamStatus`]
    /// and pass through to the client unchanged.
    pub async fn forward(
        &self,
        host: &str,
        path_template: &str,
        method: &str,
        timeout_ms: u64,
        mut params: ParamMap,
        identity: &Identity,
    ) -> Result<ResponseEnvelope> {
        let path = substitute_path(path_template, &mut params)?;
        let url = format!("{}{path}", host.trim_end_matches('/'));
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::Config(format!("invalid upstream method: {method}")))?;

        let sends_body =
            method == Method::POST || method == Method::PUT || method == Method::PATCH;

        let mut request = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(timeout_ms));
        request = identity_headers(request, identity);
        if sends_body {
            request = request.json(&Value::Object(params.to_object()));
        } else if !params.is_empty() {
            request = request.query(&query_pairs(&params));
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(&e, timeout_ms))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify(&e, timeout_ms))?;

        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "Upstream returned an error status");
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let data = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };
        Ok(ResponseEnvelope::ok(data))
    }
}

fn classify(err: &reqwest::Error, timeout_ms: u64) -> Error {
    if err.is_timeout() {
        Error::UpstreamTimeout(timeout_ms)
    } else {
        Error::UpstreamConnection(err.to_string())
    }
}

/// Fill `{name}` segments of an upstream path template, consuming the
/// bound parameters.
fn substitute_path(template: &str, params: &mut ParamMap) -> Result<String> {
    let mut segments = Vec::new();
    for segment in template.split('/') {
        if let Some(name) = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            let value = params.remove(name).ok_or_else(|| {
                Error::Config(format!("upstream path variable {{{name}}} is unbound"))
            })?;
            segments.push(render_scalar(&value));
        } else {
            segments.push(segment.to_string());
        }
    }
    Ok(segments.join("/"))
}

/// Flatten remaining parameters into query pairs; arrays repeat the key.
fn query_pairs(params: &ParamMap) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params.iter() {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.to_string(), render_scalar(item)));
                }
            }
            other => pairs.push((key.to_string(), render_scalar(other))),
        }
    }
    pairs
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn identity_headers(request: RequestBuilder, identity: &Identity) -> RequestBuilder {
    match identity {
        Identity::Anonymous => request,
        Identity::User {
            user_id,
            tenant_id,
            roles,
        } => {
            let request = request
                .header(USER_ID_HEADER, user_id)
                .header(TENANT_ID_HEADER, tenant_id);
            if roles.is_empty() {
                request
            } else {
                request.header(ROLES_HEADER, roles.join(","))
            }
        }
        Identity::App { app_key, tenant_id } => request
            .header(APP_KEY_HEADER, app_key)
            .header(TENANT_ID_HEADER, tenant_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn path_substitution_consumes_bound_params() {
        let mut params = ParamMap::new();
        params.insert("id", json!("42"));
        params.insert("page", json!("2"));

        let path = substitute_path("/api/items/{id}", &mut params).unwrap();
        assert_eq!(path, "/api/items/42");
        assert_eq!(params.get("id"), None);
        assert_eq!(params.get("page"), Some(&json!("2")));
    }

    #[test]
    fn numeric_params_render_bare_in_paths() {
        let mut params = ParamMap::new();
        params.insert("id", json!(42));

        let path = substitute_path("/items/{id}", &mut params).unwrap();
        assert_eq!(path, "/items/42");
    }

    #[test]
    fn unbound_path_variable_is_a_config_error() {
        let mut params = ParamMap::new();
        let err = substitute_path("/items/{id}", &mut params).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn literal_template_passes_through() {
        let mut params = ParamMap::new();
        let path = substitute_path("/health/ready", &mut params).unwrap();
        assert_eq!(path, "/health/ready");
    }

    #[test]
    fn query_pairs_repeat_array_keys() {
        let mut params = ParamMap::new();
        params.insert("tag", json!(["a", "b"]));
        params.insert("page", json!(2));

        let pairs = query_pairs(&params);
        assert_eq!(
            pairs,
            vec![
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }
}
