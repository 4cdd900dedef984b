//! Configuration management

use std::time::Duration;
use std::{env, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::limit::{AlgorithmKind, KeyStrategy, StoreFailurePolicy};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Rate-limit configuration
    pub rate_limit: RateLimitConfig,
    /// Shared store configuration
    pub store: StoreConfig,
    /// Route and credential provider configuration
    pub providers: ProvidersConfig,
    /// RPC backend configuration
    pub rpc: RpcConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `EDGE_GATEWAY_` prefix with `__` as
    /// the section separator, e.g. `EDGE_GATEWAY_SERVER__PORT=9090`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("EDGE_GATEWAY_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration for problems a deployment would hit at
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host {}: {e}", self.server.host)))?;

        if self.rate_limit.default_limit == 0 {
            return Err(Error::Config(
                "rate_limit.default_limit must be at least 1".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(Error::Config(
                "rate_limit.window_secs must be at least 1".into(),
            ));
        }

        if self.store.kind == StoreKind::Redis {
            let url = self.store.resolve_url()?;
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(Error::Config(format!("Invalid redis url: {url}")));
            }
        }

        if self.providers.kind == ProviderKind::Http {
            url::Url::parse(&self.providers.base_url)
                .map_err(|e| Error::Config(format!("Invalid providers.base_url: {e}")))?;
        }

        // Resolving eagerly surfaces missing env indirections before the
        // first token route is hit.
        self.auth.resolve_jwt_secret()?;
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum buffered request body size (bytes)
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens; supports `env:VAR_NAME` indirection
    pub jwt_secret: String,
    /// Clock-skew allowance when validating token expiry
    pub jwt_leeway_secs: u64,
    /// How far a signed timestamp may drift from the gateway clock
    pub signature_tolerance_secs: u64,
    /// How long fetched app credentials stay cached
    pub credential_cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_leeway_secs: 30,
            signature_tolerance_secs: 300,
            credential_cache_ttl_secs: 60,
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` indirection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the named variable is not set.
    pub fn resolve_jwt_secret(&self) -> Result<String> {
        resolve_secret(&self.jwt_secret)
    }

    /// Signed-timestamp tolerance as a [`Duration`].
    #[must_use]
    pub fn signature_tolerance(&self) -> Duration {
        Duration::from_secs(self.signature_tolerance_secs)
    }

    /// Credential cache TTL as a [`Duration`].
    #[must_use]
    pub fn credential_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_cache_ttl_secs)
    }
}

/// Rate-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Which algorithm buckets requests
    pub algorithm: AlgorithmKind,
    /// Which request dimension keys the buckets
    pub key_strategy: KeyStrategy,
    /// Behavior when the shared store cannot answer
    pub on_store_error: StoreFailurePolicy,
    /// Budget for routes that enable limiting without their own qps
    pub default_limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::default(),
            key_strategy: KeyStrategy::default(),
            on_store_error: StoreFailurePolicy::default(),
            default_limit: 100,
            window_secs: 1,
        }
    }
}

impl RateLimitConfig {
    /// Window length as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Which shared store backs counters and nonce claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-process store; suitable for a single instance and for tests
    #[default]
    Memory,
    /// Redis; shared across a fleet of gateways
    Redis,
}

/// Shared store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store backend
    pub kind: StoreKind,
    /// Redis connection URL; supports `env:VAR_NAME` indirection
    pub url: String,
    /// Sweep interval for expired in-memory entries
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            sweep_interval_secs: 60,
        }
    }
}

impl StoreConfig {
    /// Resolve the store URL, expanding `env:VAR_NAME` indirection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the named variable is not set.
    pub fn resolve_url(&self) -> Result<String> {
        resolve_secret(&self.url)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Where routes and app credentials come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// In-process fixtures; suitable for tests and demos
    #[default]
    Memory,
    /// Admin-service HTTP API
    Http,
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider backend
    pub kind: ProviderKind,
    /// Base URL of the admin service (http provider)
    pub base_url: String,
    /// Outbound request timeout for provider calls
    pub timeout_ms: u64,
    /// Interval between full route reloads
    pub reload_interval_secs: u64,
    /// Buffered change events per subscriber
    pub bus_capacity: usize,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Memory,
            base_url: "http://127.0.0.1:8081/admin/".to_string(),
            timeout_ms: 2000,
            reload_interval_secs: 30,
            bus_capacity: 64,
        }
    }
}

impl ProvidersConfig {
    /// Provider call timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Route reload interval as a [`Duration`].
    #[must_use]
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

/// RPC backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RpcConfig {
    /// JSON-RPC endpoint for rpc backends; without one, rpc routes are
    /// served by the in-memory client (mock deployments)
    pub endpoint: Option<String>,
}

/// Expand `env:VAR_NAME` indirection in a config value.
fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).map_err(|_| {
            Error::Config(format!("Environment variable {var_name} is not set"))
        }),
        None => Ok(value.to_string()),
    }
}
