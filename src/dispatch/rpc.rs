//! RPC backend invocation.
//!
//! Routes can target internal services by interface and method instead
//! of a URL. The transport is JSON-RPC 2.0 over HTTP POST; the method
//! string is `interface.method`, optional version and group travel as
//! headers so intermediaries can route on them.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::ResponseEnvelope;
use crate::error::rpc_codes;
use crate::{Error, Result};

/// Header carrying the requested service version.
pub const RPC_VERSION_HEADER: &str = "x-rpc-version";
/// Header carrying the requested service group.
pub const RPC_GROUP_HEADER: &str = "x-rpc-group";

/// One RPC invocation, already bound to arguments.
#[derive(Debug, Clone)]
pub struct RpcCall<'a> {
    pub interface: &'a str,
    pub method: &'a str,
    pub version: Option<&'a str>,
    pub group: Option<&'a str>,
    /// JSON object of invocation arguments.
    pub args: Value,
}

impl RpcCall<'_> {
    /// Fully-qualified method string, `interface.method`.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}.{}", self.interface, self.method)
    }
}

/// Transport for RPC calls.
///
/// # Thread Safety
///
/// Implementations are shared across request tasks; they must be
/// `Send + Sync`.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Invoke `call` and return the raw result value.
    ///
    /// # Errors
    ///
    /// [`Error::RpcNotFound`] when the target does not exist,
    /// [`Error::RpcInvocation`] when the target faulted.
    async fn invoke(&self, call: RpcCall<'_>) -> Result<Value>;
}

/// Run `call` under the route's timeout budget.
///
/// The deadline is enforced here rather than in each client so every
/// transport observes the same budget.
pub(super) async fn invoke_with_deadline(
    client: &dyn RpcClient,
    call: RpcCall<'_>,
    timeout_ms: u64,
) -> Result<ResponseEnvelope> {
    let deadline = Duration::from_millis(timeout_ms);
    match tokio::time::timeout(deadline, client.invoke(call)).await {
        Ok(result) => result.map(ResponseEnvelope::ok),
        Err(_) => Err(Error::RpcTimeout(timeout_ms)),
    }
}

/// JSON-RPC 2.0 client posting to a fixed endpoint.
pub struct JsonRpcClient {
    client: reqwest::Client,
    endpoint: String,
}

impl JsonRpcClient {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl RpcClient for JsonRpcClient {
    async fn invoke(&self, call: RpcCall<'_>) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": call.target(),
            "params": call.args,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(version) = call.version {
            request = request.header(RPC_VERSION_HEADER, version);
        }
        if let Some(group) = call.group {
            request = request.header(RPC_GROUP_HEADER, group);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::UpstreamConnection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::RpcInvocation(format!(
                "rpc endpoint returned status {}",
                response.status().as_u16()
            )));
        }

        let reply = response
            .bytes()
            .await
            .map_err(|e| Error::UpstreamConnection(e.to_string()))?;
        parse_reply(&reply, &call.target())
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcReply {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

fn parse_reply(raw: &[u8], target: &str) -> Result<Value> {
    let reply: JsonRpcReply = serde_json::from_slice(raw)
        .map_err(|e| Error::RpcInvocation(format!("malformed rpc reply: {e}")))?;

    if let Some(error) = reply.error {
        if error.code == rpc_codes::METHOD_NOT_FOUND {
            return Err(Error::RpcNotFound(target.to_string()));
        }
        return Err(Error::RpcInvocation(error.message));
    }
    reply
        .result
        .ok_or_else(|| Error::RpcInvocation("rpc reply carried neither result nor error".into()))
}

/// In-memory RPC client for tests and mock deployments.
///
/// Targets are keyed `interface.method`; unknown targets report
/// [`Error::RpcNotFound`]. An optional delay simulates slow services.
#[derive(Default)]
pub struct StaticRpcClient {
    replies: DashMap<String, Value>,
    delay: Option<Duration>,
}

impl StaticRpcClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every invocation by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register the reply for `interface.method`.
    pub fn insert(&self, target: &str, reply: Value) {
        self.replies.insert(target.to_string(), reply);
    }
}

#[async_trait]
impl RpcClient for StaticRpcClient {
    async fn invoke(&self, call: RpcCall<'_>) -> Result<Value> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .get(&call.target())
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::RpcNotFound(call.target()))
    }
}
