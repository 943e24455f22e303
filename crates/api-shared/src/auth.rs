//! Caller resolution.
//!
//! Authentication itself happens in front of the engine; by the time a request reaches an API
//! surface the gateway has put the staff member's id in `x-user-id`. This module turns that header
//! into an [`Actor`] through the directory, so role and tenant always come from the engine's own
//! records rather than from the request.

use careplan_core::scope::Actor;
use careplan_core::CareEngine;
use careplan_ids::UserId;

/// Header carrying the calling staff member's canonical user id.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing {USER_ID_HEADER} header")]
    MissingHeader,
    #[error("malformed {USER_ID_HEADER} header")]
    InvalidUserId,
    #[error("unknown user")]
    UnknownUser,
}

/// Resolve the raw header value to an actor.
///
/// Any directory failure is reported as [`AuthError::UnknownUser`]; callers should not learn
/// whether an id exists.
pub fn resolve_caller(engine: &CareEngine, header: Option<&str>) -> Result<Actor, AuthError> {
    let raw = header
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingHeader)?;
    let user_id = UserId::parse(raw).map_err(|_| AuthError::InvalidUserId)?;
    engine
        .directory
        .resolve(user_id)
        .map_err(|_| AuthError::UnknownUser)
}
