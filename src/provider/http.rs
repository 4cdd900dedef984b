//! Management-plane HTTP providers.
//!
//! Wire contract, relative to the configured base URL:
//!
//! - `GET routes?scope=all` / `GET routes?tenant_id={id}` -> `[RouteDefinition]`
//! - `GET routes/{id}` -> `RouteDefinition`, 404 when absent
//! - `GET apps/{app_key}` -> `AppCredential`, 404 when unknown
//! - `GET apps/{app_key}/subscriptions/{api_id}` -> `{"subscribed": bool}`
//! - `GET apps/{app_key}/subscription?path={path}` -> `{"subscribed": bool}`
//!
//! Any non-2xx other than 404 is a provider failure; 404 means "does not
//! exist" and is not an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{AppCredential, CredentialProvider, RouteProvider, Scope};
use crate::route::RouteDefinition;
use crate::{Error, Result};

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| Error::Provider(e.to_string()))
}

/// Parse the base URL, forcing a trailing slash so joins stay inside it.
fn parse_base(base_url: &str) -> Result<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized)
        .map_err(|e| Error::Config(format!("invalid provider base url {base_url}: {e}")))
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::Provider(format!("url join failed: {e}")))
}

async fn fetch_optional<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: Url,
) -> Result<Option<T>> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::Provider(e.to_string()))?;

    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        status if status.is_success() => {
            let body = response
                .json::<T>()
                .await
                .map_err(|e| Error::Provider(format!("malformed provider payload: {e}")))?;
            Ok(Some(body))
        }
        status => Err(Error::Provider(format!(
            "provider returned {status} for {}",
            url.path()
        ))),
    }
}

/// Route source backed by the management plane HTTP API.
pub struct HttpRouteProvider {
    client: Client,
    base: Url,
}

impl HttpRouteProvider {
    /// Create a provider rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparseable base URL and
    /// [`Error::Provider`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
        })
    }
}

#[async_trait]
impl RouteProvider for HttpRouteProvider {
    async fn published_routes(&self, scope: &Scope) -> Result<Vec<RouteDefinition>> {
        let mut url = join(&self.base, "routes")?;
        match scope {
            Scope::AllTenants => {
                url.query_pairs_mut().append_pair("scope", "all");
            }
            Scope::Tenant(id) => {
                url.query_pairs_mut().append_pair("tenant_id", id);
            }
        }
        let routes: Option<Vec<RouteDefinition>> = fetch_optional(&self.client, url).await?;
        Ok(routes.unwrap_or_default())
    }

    async fn route_by_id(&self, route_id: &str) -> Result<Option<RouteDefinition>> {
        let url = join(&self.base, &format!("routes/{route_id}"))?;
        fetch_optional(&self.client, url).await
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionReply {
    subscribed: bool,
}

/// Credential source backed by the management plane HTTP API.
pub struct HttpCredentialProvider {
    client: Client,
    base: Url,
}

impl HttpCredentialProvider {
    /// Create a provider rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparseable base URL and
    /// [`Error::Provider`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
        })
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn credential(&self, app_key: &str) -> Result<Option<AppCredential>> {
        let url = join(&self.base, &format!("apps/{app_key}"))?;
        fetch_optional(&self.client, url).await
    }

    async fn is_subscribed_to_api(&self, app_key: &str, api_id: &str) -> Result<bool> {
        let url = join(&self.base, &format!("apps/{app_key}/subscriptions/{api_id}"))?;
        let reply: Option<SubscriptionReply> = fetch_optional(&self.client, url).await?;
        Ok(reply.is_some_and(|r| r.subscribed))
    }

    async fn is_subscribed_to_path(&self, app_key: &str, path: &str) -> Result<bool> {
        let mut url = join(&self.base, &format!("apps/{app_key}/subscription"))?;
        url.query_pairs_mut().append_pair("path", path);
        let reply: Option<SubscriptionReply> = fetch_optional(&self.client, url).await?;
        Ok(reply.is_some_and(|r| r.subscribed))
    }
}
