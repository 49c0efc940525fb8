pub mod events;
pub mod links;
pub mod redirect;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::ServiceError;

/// Opaque, pre-verified owner identity supplied by the upstream identity
/// provider in the `X-Owner-Id` header. The service never authenticates;
/// it only scopes link creation, listing, and subscriptions by this value.
pub struct OwnerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-owner-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_owned()))
            .ok_or_else(|| ServiceError::InvalidRequest("missing X-Owner-Id header".into()))
    }
}
