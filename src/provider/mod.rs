//! Outbound collaborator interfaces.
//!
//! The gateway owns no route or credential data; it looks both up through
//! the traits here. Each trait ships with two implementations:
//!
//! - an HTTP client against the management plane ([`HttpRouteProvider`],
//!   [`HttpCredentialProvider`]) for normal deployments
//! - an in-memory table ([`MemoryRouteProvider`],
//!   [`MemoryCredentialProvider`]) for single-binary setups and tests
//!
//! Tenant visibility is always an explicit [`Scope`] argument. There is no
//! ambient "see everything" mode a caller could forget to reset.

mod cache;
mod http;
mod memory;

pub use self::cache::{CredentialCache, spawn_evict_task};
pub use self::http::{HttpCredentialProvider, HttpRouteProvider};
pub use self::memory::{MemoryCredentialProvider, MemoryRouteProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::route::RouteDefinition;
use crate::Result;

/// Tenant visibility of a provider lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every tenant's data; used by the gateway-wide snapshot load.
    AllTenants,
    /// One tenant's data.
    Tenant(String),
}

/// App credential lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    /// Credential may sign requests
    Active,
    /// Administratively disabled
    Disabled,
    /// Marked expired by the management plane
    Expired,
}

/// Signing credential for the signature auth path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCredential {
    /// Public identifier sent in `X-App-Key`
    pub app_key: String,
    /// Shared HMAC secret; never logged, never returned to clients
    pub app_secret: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Lifecycle status
    pub status: AppStatus,
    /// Hard expiry; `None` means the credential never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AppCredential {
    /// Whether the credential may be used at `now`.
    ///
    /// Checked on every use, including cache hits, so a cached credential is
    /// never honored past its hard expiry.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == AppStatus::Active && self.expires_at.is_none_or(|at| at > now)
    }
}

/// Source of route definitions.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be stored in
/// `Arc<dyn RouteProvider>` and shared across async tasks.
#[async_trait]
pub trait RouteProvider: Send + Sync + 'static {
    /// All currently published routes visible in `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying source is unavailable.
    async fn published_routes(&self, scope: &Scope) -> Result<Vec<RouteDefinition>>;

    /// One route by id, any status, or `None` when it does not exist.
    ///
    /// The invalidation path uses this to learn whether a changed route is
    /// still published.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying source is unavailable.
    async fn route_by_id(&self, route_id: &str) -> Result<Option<RouteDefinition>>;
}

/// Source of app credentials and subscription entitlements.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// Credential for `app_key`, or `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying source is unavailable.
    async fn credential(&self, app_key: &str) -> Result<Option<AppCredential>>;

    /// Whether `app_key` holds a subscription to the API identified by
    /// `api_id` (the route id).
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying source is unavailable.
    async fn is_subscribed_to_api(&self, app_key: &str, api_id: &str) -> Result<bool>;

    /// Whether `app_key` holds a subscription covering `path`. Fallback for
    /// grants expressed as path prefixes rather than route ids.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying source is unavailable.
    async fn is_subscribed_to_path(&self, app_key: &str, path: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn credential(status: AppStatus, expires_at: Option<DateTime<Utc>>) -> AppCredential {
        AppCredential {
            app_key: "AK123".into(),
            app_secret: "topsecret".into(),
            tenant_id: "t1".into(),
            status,
            expires_at,
        }
    }

    #[test]
    fn active_without_expiry_is_usable() {
        let now = Utc::now();
        assert!(credential(AppStatus::Active, None).is_usable(now));
    }

    #[test]
    fn disabled_or_expired_status_is_not_usable() {
        let now = Utc::now();
        assert!(!credential(AppStatus::Disabled, None).is_usable(now));
        assert!(!credential(AppStatus::Expired, None).is_usable(now));
    }

    #[test]
    fn hard_expiry_is_enforced() {
        let now = Utc::now();
        let past = now - TimeDelta::seconds(1);
        let future = now + TimeDelta::seconds(60);
        assert!(!credential(AppStatus::Active, Some(past)).is_usable(now));
        assert!(credential(AppStatus::Active, Some(future)).is_usable(now));
    }
}
