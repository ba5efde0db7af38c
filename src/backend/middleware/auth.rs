/**
 * Identity and Admin Authentication
 *
 * The engine does not authenticate end users itself. An `IdentityResolver`
 * maps request headers to a user id; the default `HeaderIdentity` trusts a
 * header set by an upstream gateway that has already authenticated the caller.
 *
 * Admin routes are protected by `admin_auth`, which compares a bearer token
 * (or `x-admin-token`) with the configured admin token. When no admin token is
 * configured, admin routes are refused outright.
 */

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::backend::error::CollabError;
use crate::backend::services::CollabServices;
use crate::shared::UserId;

pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Maps an incoming request to the user it acts for
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<UserId>;
}

/// Reads the user id from a trusted header
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_IDENTITY_HEADER))
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Option<UserId> {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(str::to_string)
    }
}

/// Token presented by the caller, from `Authorization: Bearer` or `x-admin-token`
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .or_else(|| headers.get(ADMIN_TOKEN_HEADER).and_then(|h| h.to_str().ok()))
        .map(str::trim)
}

/// Compare tokens without stopping at the first differing byte
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Admin token middleware
pub async fn admin_auth(
    State(services): State<Arc<CollabServices>>,
    request: Request,
    next: Next,
) -> Result<Response, CollabError> {
    let Some(expected) = services.config.admin_token.as_deref() else {
        tracing::warn!("[Admin] Admin request refused, no admin token configured");
        return Err(CollabError::permission("admin routes are disabled"));
    };

    let rejection = match presented_token(request.headers()) {
        Some(token) if tokens_match(token, expected) => None,
        Some(_) => Some("invalid admin token"),
        None => Some("admin token required"),
    };
    if let Some(reason) = rejection {
        tracing::warn!("[Admin] {} for {}", reason, request.uri().path());
        return Err(CollabError::permission(reason));
    }
    Ok(next.run(request).await)
}
