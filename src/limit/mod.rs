//! Rate limiting over the shared store.
//!
//! Three interchangeable algorithms sit behind [`RateLimitAlgorithm`]; all
//! of them run their count-and-decide step inside [`SharedStore`], so a
//! fleet of gateways sharing one store never undercounts.
//!
//! The [`RateLimiter`] facade applies per-route budgets and the configured
//! store-failure policy: limiting is traffic shaping, so the default is to
//! fail open with a warning; strict deployments flip to fail closed.

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::route::{RouteDefinition, normalize_path};
use crate::store::SharedStore;
use crate::{Error, Result};

/// Which dimension requests are bucketed by.
///
/// The strategy is deployment-wide. Keys carry only the chosen dimension:
/// with a strategy coarser than `ip_path`, routes sharing a dimension share
/// its counter, and each route checks that counter against its own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Per client address
    Ip,
    /// Per normalized request path
    Path,
    /// Per (client address, path) pair
    #[default]
    IpPath,
    /// Per presented credential (bearer token or app key), falling back to
    /// the client address when the request carries none
    User,
    /// One budget for the whole gateway
    Global,
}

/// What to do when the store cannot answer a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Admit the request and log a warning (default)
    #[default]
    Open,
    /// Reject the request as rate limited
    Closed,
}

/// Rate-limit algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Hard-reset window counters; cheapest, bursts up to 2x at boundaries
    #[default]
    FixedWindow,
    /// Sub-window histogram over the trailing window; smoother admission
    SlidingWindow,
    /// Token bucket; burst up to the limit, steady refill
    TokenBucket,
}

/// A built rate-limit key, one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateKey(String);

impl RateKey {
    /// Compose the key for `strategy` from request attributes.
    ///
    /// `credential` is the presented bearer token or app key, unverified at
    /// this stage; it is digested so raw credentials never reach the store.
    #[must_use]
    pub fn build(
        strategy: KeyStrategy,
        client_ip: &str,
        path: &str,
        credential: Option<&str>,
    ) -> Self {
        let norm = normalize_path(path);
        let key = match strategy {
            KeyStrategy::Ip => format!("ip:{client_ip}"),
            KeyStrategy::Path => format!("path:{norm}"),
            KeyStrategy::IpPath => format!("ip:{client_ip}:path:{norm}"),
            KeyStrategy::User => match credential {
                Some(cred) => format!("user:{}", digest(cred)),
                None => format!("ip:{client_ip}"),
            },
            KeyStrategy::Global => "global".to_string(),
        };
        Self(key)
    }

    /// The composed key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(credential: &str) -> String {
    let hash = Sha256::digest(credential.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Decision from one limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request fits the budget
    Allowed,
    /// Budget exhausted
    Limited {
        /// Seconds until the caller can expect admission
        retry_after_secs: u64,
    },
}

/// One rate-limiting algorithm over the shared store.
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync {
    /// Name used in config and logs.
    fn name(&self) -> &'static str;

    /// Count this request against `key` and decide, allowing up to `limit`
    /// requests per `window`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the shared store cannot answer; the
    /// caller applies the failure policy.
    async fn check(&self, key: &RateKey, limit: u32, window: Duration) -> Result<Decision>;
}

/// Build the configured algorithm over `store`.
#[must_use]
pub fn build_algorithm(
    kind: AlgorithmKind,
    store: Arc<dyn SharedStore>,
) -> Arc<dyn RateLimitAlgorithm> {
    match kind {
        AlgorithmKind::FixedWindow => Arc::new(FixedWindowLimiter::new(store)),
        AlgorithmKind::SlidingWindow => Arc::new(SlidingWindowLimiter::new(store)),
        AlgorithmKind::TokenBucket => Arc::new(TokenBucketLimiter::new(store)),
    }
}

/// Per-request rate-limit enforcement.
pub struct RateLimiter {
    algorithm: Arc<dyn RateLimitAlgorithm>,
    key_strategy: KeyStrategy,
    on_store_error: StoreFailurePolicy,
    default_limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Assemble the limiter from deployment configuration.
    #[must_use]
    pub fn new(
        algorithm: Arc<dyn RateLimitAlgorithm>,
        key_strategy: KeyStrategy,
        on_store_error: StoreFailurePolicy,
        default_limit: u32,
        window: Duration,
    ) -> Self {
        Self {
            algorithm,
            key_strategy,
            on_store_error,
            default_limit,
            window,
        }
    }

    /// The configured key strategy.
    #[must_use]
    pub fn key_strategy(&self) -> KeyStrategy {
        self.key_strategy
    }

    /// Enforce the budget for `route` under `key`.
    ///
    /// Routes that did not opt in pass untouched. A per-route qps scales to
    /// the configured window; without one the deployment default applies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimitExceeded`] when the budget is exhausted, or
    /// when the store failed and the policy is fail-closed.
    pub async fn enforce(&self, route: &RouteDefinition, key: &RateKey) -> Result<()> {
        if !route.rate_limit_enabled {
            return Ok(());
        }

        let window_secs = u32::try_from(self.window.as_secs().max(1)).unwrap_or(u32::MAX);
        let limit = route
            .rate_limit_qps
            .map_or(self.default_limit, |qps| qps.saturating_mul(window_secs));

        match self.algorithm.check(key, limit, self.window).await {
            Ok(Decision::Allowed) => Ok(()),
            Ok(Decision::Limited { retry_after_secs }) => {
                Err(Error::RateLimitExceeded { retry_after_secs })
            }
            Err(e) => match self.on_store_error {
                StoreFailurePolicy::Open => {
                    warn!(
                        key = %key,
                        algorithm = self.algorithm.name(),
                        error = %e,
                        "Rate-limit store unavailable, admitting request (fail-open)"
                    );
                    Ok(())
                }
                StoreFailurePolicy::Closed => {
                    warn!(
                        key = %key,
                        algorithm = self.algorithm.name(),
                        error = %e,
                        "Rate-limit store unavailable, rejecting request (fail-closed)"
                    );
                    Err(Error::RateLimitExceeded {
                        retry_after_secs: 1,
                    })
                }
            },
        }
    }
}
