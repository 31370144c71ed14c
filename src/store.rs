//! Durable users, rooms and chat history in SQLite.

use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::payload::{self, MessageKind, MessagePayload, RoomId, RoomPayload};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rooms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL,
    kind TEXT NOT NULL,
    user_id INTEGER REFERENCES users (id),
    room_id INTEGER NOT NULL REFERENCES rooms (id),
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS messages_by_room ON messages (room_id, created_at);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("{0} is already taken")]
    Duplicate(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub text: String,
    pub kind: MessageKind,
    pub user_id: Option<i64>,
    pub room_id: RoomId,
    pub created_at: i64,
}

impl StoredMessage {
    pub fn into_payload(self, username: Option<String>) -> MessagePayload {
        MessagePayload {
            message: self.text,
            kind: self.kind,
            username,
            room_id: Some(self.room_id),
            created: created(self.created_at),
        }
    }
}

fn created(unix: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(payload::rfc2822)
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn is_email(email: &str) -> bool {
    matches!(email.split_once('@'), Some((user, domain)) if !user.is_empty() && !domain.is_empty())
}

#[derive(Debug, Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// A private database that lives as long as the store. Pinned to one
    /// connection so every query sees the same memory.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("database schema is up to date");
        Ok(())
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(StoreError::Invalid("username must not be empty"));
        }
        if !is_email(email) {
            return Err(StoreError::Invalid("email is not valid"));
        }
        if password_hash.is_empty() {
            return Err(StoreError::Invalid("password must not be empty"));
        }

        let result = sqlx::query(
            "INSERT INTO users (username,email,password_hash,created_at) VALUES (?,?,?,?)",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now())
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                let field = if err.message().contains("email") {
                    "email"
                } else {
                    "username"
                };
                return Err(StoreError::Duplicate(field));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash: password_hash.to_owned(),
        })
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user: Option<(i64, String, String, String)> =
            sqlx::query_as("SELECT id,username,email,password_hash FROM users WHERE username=?")
                .bind(username.trim())
                .fetch_optional(&self.pool)
                .await?;

        Ok(user.map(|(id, username, email, password_hash)| User {
            id,
            username,
            email,
            password_hash,
        }))
    }

    pub async fn create_room(&self, name: &str) -> Result<RoomPayload, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("room name must not be empty"));
        }

        let result = sqlx::query("INSERT INTO rooms (name,created_at) VALUES (?,?)")
            .bind(name)
            .bind(now())
            .execute(&self.pool)
            .await?;

        Ok(RoomPayload {
            id: result.last_insert_rowid(),
            name: name.to_owned(),
        })
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomPayload>, StoreError> {
        let rooms: Vec<(i64, String)> =
            sqlx::query_as("SELECT id,name FROM rooms ORDER BY created_at,id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rooms
            .into_iter()
            .map(|(id, name)| RoomPayload { id, name })
            .collect())
    }

    pub async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let room: Option<(i64,)> = sqlx::query_as("SELECT id FROM rooms WHERE id=?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(room.is_some())
    }

    pub async fn create_message(
        &self,
        text: &str,
        kind: &MessageKind,
        author_id: Option<i64>,
        room_id: RoomId,
    ) -> Result<StoredMessage, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::Invalid("message must not be empty"));
        }
        if kind.as_str().trim().is_empty() {
            return Err(StoreError::Invalid("message type must not be empty"));
        }

        let created_at = now();
        let result = sqlx::query(
            "INSERT INTO messages (text,kind,user_id,room_id,created_at) VALUES (?,?,?,?,?)",
        )
        .bind(text)
        .bind(kind.as_str())
        .bind(author_id)
        .bind(room_id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(StoredMessage {
            id: result.last_insert_rowid(),
            text: text.to_owned(),
            kind: kind.clone(),
            user_id: author_id,
            room_id,
            created_at,
        })
    }

    /// The most recent `limit` messages of a room, oldest first.
    pub async fn last_messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, StoreError> {
        let rows: Vec<(i64, String, String, Option<i64>, i64, Option<String>)> = sqlx::query_as(
            "SELECT m.id,m.text,m.kind,m.user_id,m.created_at,u.username \
             FROM messages m LEFT JOIN users u ON u.id=m.user_id \
             WHERE m.room_id=? ORDER BY m.created_at DESC,m.id DESC LIMIT ?",
        )
        .bind(room_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(id, text, kind, user_id, created_at, username)| {
                StoredMessage {
                    id,
                    text,
                    kind: kind.into(),
                    user_id,
                    room_id,
                    created_at,
                }
                .into_payload(username)
            })
            .collect())
    }
}
