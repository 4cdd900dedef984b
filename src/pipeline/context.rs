//! Per-request state threaded through the pipeline stages.

use std::net::IpAddr;

use axum::http::HeaderMap;
use bytes::Bytes;

use crate::auth::{
    APP_KEY_HEADER, AuthRequest, Identity, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::dispatch::ResponseEnvelope;
use crate::params::ParamMap;
use crate::route::RouteMatch;
use crate::{Error, Result};

/// Everything the stages read from and write to while a request is in
/// flight.
///
/// Inbound attributes are fixed at construction; `route`, `identity`,
/// `params` and `response` are filled in by their stages.
pub struct RequestContext {
    method: String,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    client_ip: IpAddr,
    /// Set by the routing stage.
    pub route: Option<RouteMatch>,
    /// Set by the auth stage; `Anonymous` until then.
    pub identity: Identity,
    /// Set by the params stage.
    pub params: ParamMap,
    /// Set by the dispatch stage.
    pub response: Option<ResponseEnvelope>,
}

impl RequestContext {
    /// Capture an inbound request.
    ///
    /// `peer` is the socket address's IP; when an `X-Forwarded-For`
    /// header is present its first hop wins, since that is the client
    /// the edge proxy saw.
    #[must_use]
    pub fn new(
        method: &str,
        path: &str,
        query: Option<String>,
        headers: HeaderMap,
        body: Bytes,
        peer: IpAddr,
    ) -> Self {
        let client_ip = forwarded_client_ip(&headers).unwrap_or(peer);
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
            headers,
            body,
            client_ip,
            route: None,
            identity: Identity::Anonymous,
            params: ParamMap::new(),
            response: None,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Buffered request body; empty when the request had none.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Effective client address used for rate-limit keys and logs.
    #[must_use]
    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// First value of `name`, when it is valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Authorization: Bearer` payload, scheme matched case-insensitively.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// Whatever credential the caller presented, unverified.
    ///
    /// Used for `user`-keyed rate limiting, which runs before auth.
    #[must_use]
    pub fn presented_credential(&self) -> Option<&str> {
        self.bearer_token().or_else(|| self.header(APP_KEY_HEADER))
    }

    /// Project the authentication-relevant slice of this request.
    #[must_use]
    pub fn auth_request(&self) -> AuthRequest<'_> {
        AuthRequest {
            method: &self.method,
            path: &self.path,
            bearer_token: self.bearer_token(),
            app_key: self.header(APP_KEY_HEADER),
            timestamp: self.header(TIMESTAMP_HEADER),
            nonce: self.header(NONCE_HEADER),
            signature: self.header(SIGNATURE_HEADER),
        }
    }

    /// The match the routing stage bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when called before routing ran; stage
    /// ordering makes that unreachable in a correctly assembled pipeline.
    pub fn expect_route(&self) -> Result<&RouteMatch> {
        self.route
            .as_ref()
            .ok_or_else(|| Error::Internal("route consulted before resolution".into()))
    }
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|first| first.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx(headers: HeaderMap) -> RequestContext {
        RequestContext::new(
            "get",
            "/open/ping",
            Some("a=1".into()),
            headers,
            Bytes::new(),
            "9.9.9.9".parse().unwrap(),
        )
    }

    #[test]
    fn method_is_uppercased() {
        assert_eq!(ctx(HeaderMap::new()).method(), "GET");
    }

    #[test]
    fn peer_address_is_the_default_client_ip() {
        assert_eq!(
            ctx(HeaderMap::new()).client_ip(),
            "9.9.9.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn first_forwarded_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.2, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(
            ctx(headers).client_ip(),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn unparseable_forwarded_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(
            ctx(headers).client_ip(),
            "9.9.9.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn bearer_token_is_extracted_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "bearer tok-123".parse().unwrap());
        assert_eq!(ctx(headers).bearer_token(), Some("tok-123"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok-123".parse().unwrap());
        assert_eq!(ctx(headers).bearer_token(), Some("tok-123"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwdw==".parse().unwrap());
        assert_eq!(ctx(headers).bearer_token(), None);

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(ctx(headers).bearer_token(), None);
    }

    #[test]
    fn presented_credential_prefers_the_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok-123".parse().unwrap());
        headers.insert("x-app-key", "AK1".parse().unwrap());
        assert_eq!(ctx(headers).presented_credential(), Some("tok-123"));

        let mut headers = HeaderMap::new();
        headers.insert("x-app-key", "AK1".parse().unwrap());
        assert_eq!(ctx(headers).presented_credential(), Some("AK1"));

        assert_eq!(ctx(HeaderMap::new()).presented_credential(), None);
    }

    #[test]
    fn auth_request_mirrors_the_signature_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-app-key", "AK1".parse().unwrap());
        headers.insert("x-timestamp", "1700000000".parse().unwrap());
        headers.insert("x-nonce", "n-1".parse().unwrap());
        headers.insert("x-signature", "sig".parse().unwrap());

        let ctx = ctx(headers);
        let request = ctx.auth_request();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/open/ping");
        assert_eq!(request.app_key, Some("AK1"));
        assert_eq!(request.timestamp, Some("1700000000"));
        assert_eq!(request.nonce, Some("n-1"));
        assert_eq!(request.signature, Some("sig"));
    }

    #[test]
    fn route_lookup_before_routing_is_an_internal_error() {
        let err = ctx(HeaderMap::new()).expect_route().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
