//! Caller identity. Authentication happens upstream; this layer only reads the
//! asserted actor from request headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::domain::{Actor, ActorRole};
use crate::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id = header_str(headers, ACTOR_ID_HEADER)?;
    let role = header_str(headers, ACTOR_ROLE_HEADER)?;

    let id = Uuid::parse_str(id)
        .map_err(|_| AppError::Unauthorized(format!("{} is not a valid id", ACTOR_ID_HEADER)))?;
    let role = role
        .to_ascii_uppercase()
        .parse::<ActorRole>()
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    // SYSTEM is reserved for in-process workers.
    if role == ActorRole::System {
        return Err(AppError::Unauthorized("role SYSTEM cannot be asserted over HTTP".to_string()));
    }
    Ok(Actor::new(id, role))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)
    }
}
