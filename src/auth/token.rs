//! Bearer-token verification.
//!
//! The gateway verifies tokens, it never mints them. [`JwtTokenVerifier`]
//! checks HS256 signatures against the shared secret the token service
//! signs with; [`StaticTokenVerifier`] is the in-memory fixture.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Token type accepted for request authentication.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by a gateway token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the user id
    pub sub: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Role names granted to the user
    #[serde(default)]
    pub roles: Vec<String>,
    /// `access` or `refresh`; only access tokens authenticate requests
    pub token_type: String,
    /// Expiry, seconds since the unix epoch
    pub exp: u64,
}

/// Verifies bearer tokens and returns their claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] for a token that is malformed,
    /// tampered with, or expired.
    async fn verify(&self, token: &str) -> Result<TokenClaims>;
}

/// HS256 JWT verifier.
pub struct JwtTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    /// Create a verifier for tokens signed with `secret`.
    ///
    /// `leeway_secs` absorbs clock skew between the token service and the
    /// gateway when checking `exp`.
    #[must_use]
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims> {
        let data = decode::<TokenClaims>(token, &self.key, &self.validation)
            .map_err(|e| Error::Authentication(format!("invalid token: {e}")))?;
        Ok(data.claims)
    }
}

/// In-memory verifier mapping opaque token strings to claims.
///
/// Enforces `exp` like the real verifier so expiry behavior stays testable.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: DashMap<String, TokenClaims>,
}

impl StaticTokenVerifier {
    /// Create an empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` as resolving to `claims`.
    pub fn insert(&self, token: &str, claims: TokenClaims) {
        self.tokens.insert(token.to_string(), claims);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims> {
        let claims = self
            .tokens
            .get(token)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::Authentication("invalid token".into()))?;

        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        if claims.exp <= now {
            return Err(Error::Authentication("token expired".into()));
        }
        Ok(claims)
    }
}
