use axum::{Json, debug_handler, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, AppResult, AppState, store::ChatStore};

use super::AuthState;

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Serialize)]
pub(crate) struct RegisteredPayload {
    username: String,
    email: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn register(
    State(store): State<ChatStore>,
    State(auth): State<AuthState>,

    Json(RegisterRequest {
        username,
        email,
        password,
    }): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisteredPayload>)> {
    if password.is_empty() {
        return Err(AppError::bad_request("password must not be empty"));
    }

    let password_hash = auth.hash_password(password).await?;
    let user = store.create_user(&username, &email, &password_hash).await?;

    info!(username = %user.username, "registered user");
    Ok((
        StatusCode::CREATED,
        Json(RegisteredPayload {
            username: user.username,
            email: user.email,
        }),
    ))
}
