use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;

use crate::models::UserId;
use crate::utils::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
const USER_ID_QUERY_KEYS: [&str; 2] = ["X-User-Id", "user_id"];

/// The calling user. Identity is supplied by the caller, not verified.
///
/// Read from the `X-User-Id` header, falling back to the query string because
/// browser streaming clients cannot set headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = match parts.headers.get(USER_ID_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AppError::AuthError("X-User-Id header is not valid text".into()))?
                    .to_string(),
            ),
            None => from_query(&parts.uri),
        };

        let raw = raw.ok_or_else(|| AppError::AuthError("Missing X-User-Id".to_string()))?;
        raw.parse::<UserId>()
            .map(Identity)
            .map_err(|_| AppError::AuthError(format!("'{}' is not a valid user id", raw.trim())))
    }
}

fn from_query(uri: &axum::http::Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    USER_ID_QUERY_KEYS
        .iter()
        .find_map(|key| params.get(*key).cloned())
}
