//! Caller identity.
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the authenticated user as `x-user-id`.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, DomainError};
use crate::middleware::error::get_request_id_from_headers;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok());

        match user_id {
            Some(id) => Ok(AuthUser(id)),
            None => {
                let err = AppError::new(AppErrorKind::Domain(DomainError::Unauthenticated));
                Err(match get_request_id_from_headers(&parts.headers) {
                    Some(request_id) => err.with_request_id(request_id),
                    None => err,
                })
            }
        }
    }
}
