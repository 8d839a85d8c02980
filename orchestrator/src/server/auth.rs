//! Caller identity
//!
//! Authentication happens upstream. The gateway forwards the resolved owner
//! in a header and this extractor only checks that it is there.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::DeployError;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Owner of the applications a request operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = DeployError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| DeployError::Auth("missing owner identity".to_string()))?;
        Ok(OwnerId(owner.to_string()))
    }
}
