use axum::{Json, debug_handler, extract::State};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;

use crate::{
    AppResult, AppState,
    session::{USER_ID, USERNAME},
    store::ChatStore,
};

use super::{AuthError, AuthState};

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub(crate) struct TokenPayload {
    token: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(store): State<ChatStore>,
    State(auth): State<AuthState>,
    session: Session,

    Json(LoginRequest { username, password }): Json<LoginRequest>,
) -> AppResult<Json<TokenPayload>> {
    let user = store
        .find_user_by_username(&username)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    if !auth.verify_password(password, user.password_hash).await? {
        return Err(AuthError::WrongPassword.into());
    }

    let token = auth.issue(user.id, &user.username)?;

    session.cycle_id().await?;
    session.insert(USER_ID, user.id).await?;
    session.insert(USERNAME, &user.username).await?;

    info!(username = %user.username, "user logged in");
    Ok(Json(TokenPayload { token }))
}
