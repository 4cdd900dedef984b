//! Authentication for admitted requests.
//!
//! Each route names one of three schemes: `none` (open), `token` (bearer
//! JWT) or `signature` (HMAC app signature). The [`Authenticator`] runs
//! the scheme the route asks for and yields the caller's [`Identity`].
//!
//! Authentication failures map to 401, entitlement failures to 403. The
//! two are deliberately distinct: a 403 tells the caller its credentials
//! are fine but the subscription is missing.

mod nonce;
mod signature;
mod token;

pub use nonce::NonceStore;
pub use signature::{
    APP_KEY_HEADER, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, compute_signature,
    signatures_match,
};
pub use token::{
    ACCESS_TOKEN_TYPE, JwtTokenVerifier, StaticTokenVerifier, TokenClaims, TokenVerifier,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::provider::{CredentialCache, CredentialProvider};
use crate::route::{AuthKind, RouteDefinition};
use crate::{Error, Result};

/// Who is making the request, as established by authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Open route, nobody verified anything.
    Anonymous,
    /// A user presenting a bearer token.
    User {
        user_id: String,
        tenant_id: String,
        roles: Vec<String>,
    },
    /// An application presenting a request signature.
    App { app_key: String, tenant_id: String },
}

impl Identity {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::User { .. } => "user",
            Self::App { .. } => "app",
        }
    }

    /// The tenant the caller belongs to, when known.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User { tenant_id, .. } | Self::App { tenant_id, .. } => Some(tenant_id),
        }
    }
}

/// The slice of an incoming request that authentication looks at.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthRequest<'a> {
    /// HTTP method as received.
    pub method: &'a str,
    /// Request path without the query string, as received.
    pub path: &'a str,
    /// `Authorization: Bearer` value, already stripped of the scheme.
    pub bearer_token: Option<&'a str>,
    /// `X-App-Key` header.
    pub app_key: Option<&'a str>,
    /// `X-Timestamp` header.
    pub timestamp: Option<&'a str>,
    /// `X-Nonce` header.
    pub nonce: Option<&'a str>,
    /// `X-Signature` header.
    pub signature: Option<&'a str>,
}

/// Runs the authentication scheme a route demands.
pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
    credentials: Arc<CredentialCache>,
    subscriptions: Arc<dyn CredentialProvider>,
    nonces: NonceStore,
    tolerance: Duration,
}

impl Authenticator {
    /// Wire up an authenticator.
    ///
    /// `tolerance` bounds how far a signed timestamp may drift from the
    /// gateway clock; nonce claims live for twice that.
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        credentials: Arc<CredentialCache>,
        subscriptions: Arc<dyn CredentialProvider>,
        nonces: NonceStore,
        tolerance: Duration,
    ) -> Self {
        Self {
            verifier,
            credentials,
            subscriptions,
            nonces,
            tolerance,
        }
    }

    /// Authenticate `request` against `route`.
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when credentials are missing or wrong,
    /// [`Error::Authorization`] when a verified app lacks a subscription,
    /// [`Error::Provider`] when the credential backend cannot be reached.
    pub async fn authenticate(
        &self,
        route: &RouteDefinition,
        request: &AuthRequest<'_>,
    ) -> Result<Identity> {
        match route.auth {
            AuthKind::None => Ok(Identity::Anonymous),
            AuthKind::Token => self.verify_bearer(request).await,
            AuthKind::Signature => self.verify_app_signature(route, request).await,
        }
    }

    async fn verify_bearer(&self, request: &AuthRequest<'_>) -> Result<Identity> {
        let token = request
            .bearer_token
            .ok_or_else(|| Error::Authentication("missing bearer token".into()))?;

        let claims = self.verifier.verify(token).await?;
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(Error::Authentication(
                "token is not an access token".into(),
            ));
        }

        debug!(user_id = %claims.sub, tenant_id = %claims.tenant_id, "Bearer token verified");
        Ok(Identity::User {
            user_id: claims.sub,
            tenant_id: claims.tenant_id,
            roles: claims.roles,
        })
    }

    async fn verify_app_signature(
        &self,
        route: &RouteDefinition,
        request: &AuthRequest<'_>,
    ) -> Result<Identity> {
        let app_key = required(request.app_key, APP_KEY_HEADER)?;
        let timestamp_raw = required(request.timestamp, TIMESTAMP_HEADER)?;
        let nonce = required(request.nonce, NONCE_HEADER)?;
        let presented = required(request.signature, SIGNATURE_HEADER)?;

        let timestamp: i64 = timestamp_raw
            .parse()
            .map_err(|_| Error::Authentication("malformed X-Timestamp header".into()))?;

        let credential = self
            .credentials
            .get(app_key)
            .await?
            .ok_or_else(|| Error::Authentication("unknown app key".into()))?;
        if !credential.is_usable(Utc::now()) {
            return Err(Error::Authentication("app disabled or expired".into()));
        }

        let tolerance_secs = i64::try_from(self.tolerance.as_secs()).unwrap_or(i64::MAX);
        signature::check_timestamp(timestamp, Utc::now().timestamp(), tolerance_secs)?;

        let expected = compute_signature(
            request.method,
            request.path,
            timestamp,
            nonce,
            &credential.app_secret,
        )?;
        if !signatures_match(&expected, presented) {
            return Err(Error::Authentication("signature mismatch".into()));
        }

        // Only claim the nonce once the signature holds, so probing with
        // invalid signatures cannot burn someone else's nonces.
        self.nonces.claim_once(app_key, nonce).await?;

        let subscribed = self
            .subscriptions
            .is_subscribed_to_api(app_key, &route.id)
            .await?
            || self
                .subscriptions
                .is_subscribed_to_path(app_key, request.path)
                .await?;
        if !subscribed {
            return Err(Error::Authorization(format!(
                "app {app_key} is not subscribed to this API"
            )));
        }

        debug!(app_key, tenant_id = %credential.tenant_id, "App signature verified");
        Ok(Identity::App {
            app_key: app_key.to_string(),
            tenant_id: credential.tenant_id,
        })
    }
}

fn required<'a>(value: Option<&'a str>, header: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Authentication(format!("missing {header} header"))),
    }
}
