pub mod auth;
pub mod bots;
pub mod config;
pub mod hub;
pub mod payload;
pub mod queue;
pub mod rooms;
pub mod session;
pub mod store;

use std::{fmt, sync::Arc};

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::{debug, error};

use auth::{AuthError, AuthState};
use bots::BotDispatcher;
use config::ClientConfig;
use hub::{HubError, HubHandle};
use store::{ChatStore, StoreError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: ChatStore,
    pub auth: AuthState,
    pub hub: HubHandle,
    pub bots: BotDispatcher,
    pub client_config: Arc<ClientConfig>,
    #[from_ref(skip)]
    pub history_limit: u32,
}

/// The whole HTTP surface: auth at the root, chat under `/api`.
pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(1)));

    Router::new()
        .merge(auth::router())
        .nest("/api", rooms::router())
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    pub fn bad_request(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(StatusCode::BAD_REQUEST, anyhow::Error::msg(message))
    }

    pub fn not_found(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(StatusCode::NOT_FOUND, anyhow::Error::msg(message))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.status.is_server_error() {
            error!(status = %self.status, error = ?self.error, "request failed");
            "something went wrong, please try again later".to_owned()
        } else {
            debug!(status = %self.status, error = %self.error, "request rejected");
            self.error.to_string()
        };

        (self.status, Json(json!({ "error": message }))).into_response()
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        apperr_impl!($E, |_| StatusCode::INTERNAL_SERVER_ERROR);
    };
    ($E:ty, $status:expr) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                let status: fn(&$E) -> StatusCode = $status;
                Self::new(status(&err), err)
            }
        }
    };
}

apperr_impl!(tower_sessions::session::Error);
apperr_impl!(AuthError, AuthError::status);
apperr_impl!(HubError, |_| StatusCode::SERVICE_UNAVAILABLE);
apperr_impl!(StoreError, |err| match err {
    StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
    StoreError::Duplicate(_) => StatusCode::CONFLICT,
    StoreError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
});
