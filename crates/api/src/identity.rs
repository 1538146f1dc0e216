//! Caller identity and correlation token, read from request headers.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::{Identity, Role, UserId};
use domain::{DomainError, IdentityResolver};

use crate::error::ApiError;

/// Header carrying the authenticated user's id, set by the auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated user's role.
pub const USER_ROLE_HEADER: &str = "x-user-role";
/// Correlation token header, generated when the client did not send one.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Resolves an [`Identity`] from the gateway's identity headers.
///
/// Both headers must be present and well formed; anything else resolves to no
/// identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIdentityResolver;

impl IdentityResolver<HeaderMap> for HeaderIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<Identity> {
        let user_id = header_str(headers, USER_ID_HEADER)?.trim().parse::<i64>().ok()?;
        if user_id <= 0 {
            return None;
        }
        let role = header_str(headers, USER_ROLE_HEADER)?.parse::<Role>().ok()?;
        Some(Identity::new(UserId::new(user_id), role))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Per-request carrier handed to every handler.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Wraps a domain error so its response carries this request's id.
    pub fn error(&self, err: impl Into<DomainError>) -> ApiError {
        ApiError::new(err.into(), self.request_id.clone())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            identity: HeaderIdentityResolver.resolve(&parts.headers),
            request_id: header_str(&parts.headers, REQUEST_ID_HEADER).map(str::to_string),
        })
    }
}
