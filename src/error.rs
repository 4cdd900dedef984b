//! Error types for the gateway admission pipeline.

use std::io;

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
///
/// Client-attributable failures (401/403/404/429) carry a short message that
/// is safe to expose. Infrastructure failures map to 500 and only surface a
/// generic message; the detail is logged at the call site.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential missing, invalid, expired, or replayed (401)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Identity is valid but not entitled to the route (403)
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Per-key request budget exhausted (429)
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the current window ends or the next token accrues
        retry_after_secs: u64,
    },

    /// No published route matches the request (404)
    #[error("No route for {method} {path}")]
    RouteNotFound {
        /// Request method
        method: String,
        /// Request path
        path: String,
    },

    /// HTTP upstream did not answer within the route timeout (504)
    #[error("Upstream timeout after {0}ms")]
    UpstreamTimeout(u64),

    /// HTTP upstream unreachable (502)
    #[error("Upstream connection failed: {0}")]
    UpstreamConnection(String),

    /// HTTP upstream answered non-2xx; status passes through unchanged
    #[error("Upstream returned status {status}")]
    UpstreamStatus {
        /// Upstream status code, forwarded to the client as-is
        status: u16,
        /// Upstream response body
        body: String,
    },

    /// RPC invocation did not answer within the route timeout (504)
    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    /// RPC service or method could not be resolved (502)
    #[error("RPC target not found: {0}")]
    RpcNotFound(String),

    /// RPC call reached the target but faulted (502)
    #[error("RPC invocation failed: {0}")]
    RpcInvocation(String),

    /// Shared store (counters, nonce claims) failure
    #[error("Store error: {0}")]
    Store(String),

    /// Route or credential provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status code this error maps to.
    ///
    /// Upstream non-2xx statuses pass through unchanged; everything else
    /// follows the fixed taxonomy.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Authentication(_) => 401,
            Self::Authorization(_) => 403,
            Self::RateLimitExceeded { .. } => 429,
            Self::RouteNotFound { .. } => 404,
            Self::UpstreamTimeout(_) | Self::RpcTimeout(_) => 504,
            Self::UpstreamConnection(_) | Self::RpcNotFound(_) | Self::RpcInvocation(_) => 502,
            Self::UpstreamStatus { status, .. } => *status,
            Self::Store(_)
            | Self::Provider(_)
            | Self::Config(_)
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Json(_) => 500,
        }
    }

    /// Retry-After hint in seconds; present only for rate-limit rejections
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Message safe to return to the caller.
    ///
    /// 5xx infrastructure errors collapse to a generic message so store and
    /// provider internals never leak into responses.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(_)
            | Self::Provider(_)
            | Self::Config(_)
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Json(_) => "Internal error".to_string(),
            Self::UpstreamStatus { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

/// Standard JSON-RPC error codes used by the RPC dispatcher
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
}
