//! Request extractors
//!
//! Bearer principals, client fingerprints, and source IPs are pulled out of
//! request parts once, here, so handlers state their requirements in their
//! signatures.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::auth::{AdminSession, Claims};
use crate::error::Error;
use crate::state::AppState;

/// Header carrying the client-supplied fingerprint
pub const FINGERPRINT_HEADER: &str = "x-client-fingerprint";

/// Client-supplied request metadata: fingerprint and source IP
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub fingerprint: String,
    pub source_ip: String,
}

impl ClientMeta {
    /// Read the metadata headers; absent values become empty/unknown
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let fingerprint = headers
            .get(FINGERPRINT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let source_ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
            })
            .unwrap_or("unknown")
            .to_string();
        Self {
            fingerprint,
            source_ip,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// The bearer token string from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, Error> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::unauthorized("token_invalid", "Missing bearer token"))
}

/// Any authenticated principal (admin, agent, temp, scrape)
#[derive(Debug, Clone)]
pub struct Principal {
    pub claims: Claims,
    pub meta: ClientMeta,
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Error> {
        let meta = ClientMeta::from_headers(&parts.headers);
        let token = bearer_token(&parts.headers)?;
        let claims = state.auth.validate(token, &meta.fingerprint).await?;
        Ok(Self { claims, meta })
    }
}

/// An admin principal with its live session
#[derive(Debug, Clone)]
pub struct AdminPrincipal {
    pub claims: Claims,
    pub session: AdminSession,
    pub meta: ClientMeta,
}

impl FromRequestParts<AppState> for AdminPrincipal {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Error> {
        let meta = ClientMeta::from_headers(&parts.headers);
        let token = bearer_token(&parts.headers)?;
        let claims = state.auth.validate(token, &meta.fingerprint).await?;
        let session = state.auth.authorize_admin(&claims).await?;
        Ok(Self {
            claims,
            session,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_meta_defaults() {
        let meta = ClientMeta::from_headers(&HeaderMap::new());
        assert!(meta.fingerprint.is_empty());
        assert_eq!(meta.source_ip, "unknown");
    }

    #[test]
    fn test_client_meta_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(FINGERPRINT_HEADER, HeaderValue::from_static("fp-abc"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.1.2.3, 172.16.0.1"),
        );
        let meta = ClientMeta::from_headers(&headers);
        assert_eq!(meta.fingerprint, "fp-abc");
        assert_eq!(meta.source_ip, "10.1.2.3");
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer tok-123"),
        );
        assert_eq!(bearer_token(&headers).unwrap(), "tok-123");
    }
}
