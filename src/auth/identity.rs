use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{
    AppError,
    session::{USER_ID, USERNAME},
};

use super::{AuthError, AuthState};

/// The authenticated user behind a request.
///
/// Looked up from an `Authorization: Bearer` header, then a `bearer` query
/// parameter (browsers cannot set headers on websocket upgrades), then the
/// login session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

#[derive(Deserialize)]
struct BearerQuery {
    bearer: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned());
    if header.is_some() {
        return header;
    }

    Query::<BearerQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.bearer)
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<S> for Identity
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts) {
            return Ok(AuthState::from_ref(state).verify(&token)?);
        }

        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthError::Missing)?;
        let user_id = session.get::<i64>(USER_ID).await?;
        let username = session.get::<String>(USERNAME).await?;

        match (user_id, username) {
            (Some(user_id), Some(username)) => Ok(Identity { user_id, username }),
            _ => Err(AuthError::Missing.into()),
        }
    }
}
