mod identity;
mod login;
mod logout;
mod register;
mod token;

use axum::{Router, http::StatusCode, routing::post};
use thiserror::Error;

use crate::AppState;

pub use identity::Identity;
pub use token::{AuthState, Claims};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    Missing,
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    Expired,
    #[error("wrong password")]
    WrongPassword,
    #[error("user not found")]
    UnknownUser,
    #[error("unable to issue token")]
    Issue(#[source] jsonwebtoken::errors::Error),
    #[error("unable to hash password")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("password worker failed")]
    Join(#[from] tokio::task::JoinError),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Missing | AuthError::WrongPassword => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken | AuthError::Expired => StatusCode::FORBIDDEN,
            AuthError::UnknownUser => StatusCode::NOT_FOUND,
            AuthError::Issue(_) | AuthError::Hash(_) | AuthError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register::register))
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
}
