//! In-memory providers for single-binary deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AppCredential, CredentialProvider, RouteProvider, Scope};
use crate::route::RouteDefinition;
use crate::Result;

/// Route source backed by a process-local table.
#[derive(Debug, Default)]
pub struct MemoryRouteProvider {
    routes: DashMap<String, RouteDefinition>,
}

impl MemoryRouteProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a route, keyed by id. Any status is accepted;
    /// `published_routes` filters.
    pub fn upsert(&self, route: RouteDefinition) {
        self.routes.insert(route.id.clone(), route);
    }

    /// Remove a route entirely.
    pub fn remove(&self, route_id: &str) {
        self.routes.remove(route_id);
    }
}

#[async_trait]
impl RouteProvider for MemoryRouteProvider {
    async fn published_routes(&self, scope: &Scope) -> Result<Vec<RouteDefinition>> {
        Ok(self
            .routes
            .iter()
            .filter(|r| r.is_published())
            .filter(|r| match scope {
                Scope::AllTenants => true,
                Scope::Tenant(id) => &r.tenant_id == id,
            })
            .map(|r| r.value().clone())
            .collect())
    }

    async fn route_by_id(&self, route_id: &str) -> Result<Option<RouteDefinition>> {
        Ok(self.routes.get(route_id).map(|r| r.value().clone()))
    }
}

/// Credential source backed by process-local tables.
///
/// Subscriptions are granted either by api id ([`Self::grant_api`]) or by
/// path prefix ([`Self::grant_path_prefix`]), mirroring the two entitlement
/// checks on the trait.
#[derive(Debug, Default)]
pub struct MemoryCredentialProvider {
    credentials: DashMap<String, AppCredential>,
    api_grants: DashMap<String, Vec<String>>,
    path_grants: DashMap<String, Vec<String>>,
}

impl MemoryCredentialProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a credential, keyed by app key.
    pub fn upsert(&self, credential: AppCredential) {
        self.credentials
            .insert(credential.app_key.clone(), credential);
    }

    /// Remove a credential entirely.
    pub fn remove(&self, app_key: &str) {
        self.credentials.remove(app_key);
    }

    /// Grant `app_key` a subscription to the API with id `api_id`.
    pub fn grant_api(&self, app_key: &str, api_id: &str) {
        self.api_grants
            .entry(app_key.to_string())
            .or_default()
            .push(api_id.to_string());
    }

    /// Grant `app_key` a subscription to every path under `prefix`.
    pub fn grant_path_prefix(&self, app_key: &str, prefix: &str) {
        self.path_grants
            .entry(app_key.to_string())
            .or_default()
            .push(prefix.to_string());
    }
}

#[async_trait]
impl CredentialProvider for MemoryCredentialProvider {
    async fn credential(&self, app_key: &str) -> Result<Option<AppCredential>> {
        Ok(self.credentials.get(app_key).map(|c| c.value().clone()))
    }

    async fn is_subscribed_to_api(&self, app_key: &str, api_id: &str) -> Result<bool> {
        Ok(self
            .api_grants
            .get(app_key)
            .is_some_and(|grants| grants.iter().any(|g| g == api_id)))
    }

    async fn is_subscribed_to_path(&self, app_key: &str, path: &str) -> Result<bool> {
        Ok(self
            .path_grants
            .get(app_key)
            .is_some_and(|grants| grants.iter().any(|p| path.starts_with(p.as_str()))))
    }
}
