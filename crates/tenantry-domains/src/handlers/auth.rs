//! Bearer token guard for mutating endpoints

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::sync::Arc;
use tenantry_core::error_builder::unauthorized;
use tenantry_core::ApiError;
use tracing::debug;

use super::types::DomainAppState;

/// Extractor that admits the request when it carries the configured API
/// token. With no token configured every request is admitted.
pub struct ApiTokenAuth;

impl FromRequestParts<Arc<DomainAppState>> for ApiTokenAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<DomainAppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_token.as_deref() else {
            return Ok(ApiTokenAuth);
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(token) if tokens_match(token, expected) => Ok(ApiTokenAuth),
            Some(_) => {
                debug!("Rejected request with an invalid API token");
                Err(unauthorized().message("Invalid API token").build())
            }
            None => Err(unauthorized()
                .message("Missing bearer token in Authorization header")
                .build()),
        }
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
