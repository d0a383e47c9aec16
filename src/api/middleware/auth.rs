use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::error::AppError;
use crate::models::Principal;

/// Headers set by the authentication gateway after it has verified the
/// caller. This service trusts them as-is.
pub const HEADER_OPERATOR_ID: &str = "x-operator-id";
pub const HEADER_OPERATOR_USERNAME: &str = "x-operator-username";

/// The verified operator acting on a request
#[derive(Debug, Clone)]
pub struct AuthenticatedOperator(pub Principal);

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedOperator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(&parts.headers, HEADER_OPERATOR_ID).ok_or(AppError::Unauthorized)?;
        let username =
            header_value(&parts.headers, HEADER_OPERATOR_USERNAME).ok_or(AppError::Unauthorized)?;

        Ok(AuthenticatedOperator(Principal { id, username }))
    }
}
