//! Route definitions as served by the management plane.
//!
//! A route is immutable per version: the management plane publishes a new
//! definition rather than mutating one in place, and the gateway swaps its
//! local snapshot. Only `published` routes ever become matchable.

use serde::{Deserialize, Serialize};

/// How callers must authenticate against a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Open route, no credential required
    None,
    /// Bearer access token (JWT)
    #[default]
    Token,
    /// HMAC request signature (app key + secret)
    Signature,
}

/// Route lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    /// Authoring in progress, never matchable
    Draft,
    /// Live and matchable
    Published,
    /// Taken down, not matchable
    Offline,
    /// Retired, not matchable
    Deprecated,
}

/// Backend target a route dispatches to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Forward to an HTTP upstream
    Http {
        /// Upstream base, scheme + authority (e.g. `http://orders.internal:8080`)
        host: String,
        /// Upstream path template; `{name}` placeholders are filled from
        /// extracted parameters
        path: String,
        /// Override the inbound method when set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
    },
    /// Invoke an RPC service
    Rpc {
        /// Fully qualified service interface
        interface: String,
        /// Method name on the interface
        method: String,
        /// Service version, when the registry is versioned
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        /// Service group, when the registry is grouped
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
    /// Return a canned response without calling anything
    Mock {
        /// Body returned verbatim
        #[serde(default)]
        body: serde_json::Value,
        /// Artificial latency before responding
        #[serde(default)]
        delay_ms: u64,
    },
}

impl Backend {
    /// Short name used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Rpc { .. } => "rpc",
            Self::Mock { .. } => "mock",
        }
    }
}

fn default_timeout_ms() -> u64 {
    3000
}

/// One published route version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Stable route id, the invalidation handle
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// HTTP verb, uppercase, or `ALL`
    pub method: String,
    /// Path template: literal segments, `{name}` captures, `*` within a
    /// segment, `**` across segments
    pub path: String,
    /// Authentication requirement
    #[serde(default)]
    pub auth: AuthKind,
    /// Dispatch target
    pub backend: Backend,
    /// Per-request dispatch timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether this route participates in rate limiting
    #[serde(default)]
    pub rate_limit_enabled: bool,
    /// Per-route request budget; falls back to the deployment default when
    /// unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_qps: Option<u32>,
    /// Lifecycle status; only `published` is matchable
    pub status: RouteStatus,
}

impl RouteDefinition {
    /// Whether the route accepts `method` (its own verb or `ALL`).
    #[must_use]
    pub fn accepts_method(&self, method: &str) -> bool {
        self.method == "ALL" || self.method.eq_ignore_ascii_case(method)
    }

    /// Whether the route is live.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.status == RouteStatus::Published
    }
}
