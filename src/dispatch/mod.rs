//! Backend dispatch.
//!
//! Once a request clears admission it is handed to its route's backend:
//! an http upstream, an rpc service, or a mock. Whatever the backend,
//! the caller gets the same envelope back: `{ code, message, data }`.

mod http;
mod mock;
mod rpc;

pub use http::HttpBackend;
pub use rpc::{JsonRpcClient, RpcCall, RpcClient, StaticRpcClient};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::Identity;
use crate::params::ParamMap;
use crate::route::{Backend, RouteDefinition};
use crate::{Error, Result};

/// Uniform response body returned for every admitted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Business status code; mirrors the HTTP status except upstream
    /// passthrough, where it carries the upstream's own status.
    pub code: u16,
    /// Human-readable outcome.
    pub message: String,
    /// Backend payload, `null` on errors without one.
    pub data: Value,
}

impl ResponseEnvelope {
    /// Successful envelope wrapping `data`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            code: 200,
            message: "OK".to_string(),
            data,
        }
    }

    /// Envelope for a pipeline error.
    ///
    /// Upstream passthrough keeps the upstream body in `data` (parsed as
    /// JSON when it is JSON); every other error carries `null` data and
    /// its public message.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        if let Error::UpstreamStatus { status, body } = err {
            let data = serde_json::from_str(body)
                .unwrap_or_else(|_| Value::String(body.clone()));
            return Self {
                code: *status,
                message: "Upstream error".to_string(),
                data,
            };
        }
        Self {
            code: err.status_code(),
            message: err.public_message(),
            data: Value::Null,
        }
    }
}

/// Routes an admitted request to its backend.
pub struct Dispatcher {
    http: HttpBackend,
    rpc: Arc<dyn RpcClient>,
}

impl Dispatcher {
    /// Create a dispatcher over the given transports.
    pub fn new(client: reqwest::Client, rpc: Arc<dyn RpcClient>) -> Self {
        Self {
            http: HttpBackend::new(client),
            rpc,
        }
    }

    /// Invoke `route`'s backend with the extracted parameters.
    ///
    /// `inbound_method` is the method the client used; it drives the
    /// upstream method for http backends that do not pin one.
    ///
    /// # Errors
    ///
    /// Timeouts, connection failures, and upstream rejections map through
    /// the error taxonomy; see [`Error`].
    pub async fn dispatch(
        &self,
        route: &RouteDefinition,
        inbound_method: &str,
        params: ParamMap,
        identity: &Identity,
    ) -> Result<ResponseEnvelope> {
        debug!(
            route_id = %route.id,
            backend = route.backend.kind(),
            params = params.len(),
            "Dispatching"
        );

        match &route.backend {
            Backend::Http { host, path, method } => {
                let upstream_method = method.as_deref().unwrap_or(inbound_method);
                self.http
                    .forward(host, path, upstream_method, route.timeout_ms, params, identity)
                    .await
            }
            Backend::Rpc {
                interface,
                method,
                version,
                group,
            } => {
                let call = RpcCall {
                    interface,
                    method,
                    version: version.as_deref(),
                    group: group.as_deref(),
                    args: Value::Object(params.to_object()),
                };
                rpc::invoke_with_deadline(self.rpc.as_ref(), call, route.timeout_ms).await
            }
            Backend::Mock { body, delay_ms } => Ok(mock::respond(body, *delay_ms).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn ok_envelope_wraps_data() {
        let envelope = ResponseEnvelope::ok(json!({"id": 7}));
        assert_eq!(envelope.code, 200);
        assert_eq!(envelope.message, "OK");
        assert_eq!(envelope.data, json!({"id": 7}));
    }

    #[test]
    fn error_envelope_uses_taxonomy_code_and_public_message() {
        let envelope =
            ResponseEnvelope::from_error(&Error::Authentication("signature mismatch".into()));
        assert_eq!(envelope.code, 401);
        assert_eq!(
            envelope.message,
            "Authentication failed: signature mismatch"
        );
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn infrastructure_errors_collapse_to_generic_message() {
        let envelope = ResponseEnvelope::from_error(&Error::Store("redis://secret".into()));
        assert_eq!(envelope.code, 500);
        assert_eq!(envelope.message, "Internal error");
    }

    #[test]
    fn upstream_passthrough_keeps_status_and_json_body() {
        let envelope = ResponseEnvelope::from_error(&Error::UpstreamStatus {
            status: 409,
            body: r#"{"reason":"conflict"}"#.into(),
        });
        assert_eq!(envelope.code, 409);
        assert_eq!(envelope.data, json!({"reason": "conflict"}));
    }

    #[test]
    fn upstream_passthrough_keeps_plain_text_body_as_string() {
        let envelope = ResponseEnvelope::from_error(&Error::UpstreamStatus {
            status: 503,
            body: "maintenance".into(),
        });
        assert_eq!(envelope.code, 503);
        assert_eq!(envelope.data, json!("maintenance"));
    }

    #[tokio::test]
    async fn mock_backend_returns_its_body() {
        let dispatcher = Dispatcher::new(
            reqwest::Client::new(),
            Arc::new(StaticRpcClient::new()),
        );
        let route = crate::route::RouteDefinition {
            id: "mock-1".into(),
            tenant_id: "t1".into(),
            method: "GET".into(),
            path: "/ping".into(),
            auth: crate::route::AuthKind::None,
            backend: Backend::Mock {
                body: json!({"pong": true}),
                delay_ms: 0,
            },
            timeout_ms: 1000,
            rate_limit_enabled: false,
            rate_limit_qps: None,
            status: crate::route::RouteStatus::Published,
        };

        let envelope = dispatcher
            .dispatch(&route, "GET", ParamMap::new(), &Identity::Anonymous)
            .await
            .unwrap();
        assert_eq!(envelope, ResponseEnvelope::ok(json!({"pong": true})));
    }
}
