//! Data Access Layer
//!
//! This module contains all the functions for interacting with the application
//! database (users and chat history). It uses `sqlx` with SQLite and embedded
//! migrations.

use anyhow::{Context, Result};
use chrono::Utc;
use grammar_tutor_core::llm_client::TokenUsage;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use crate::models::{ChatHistory, MessageRole, NewUser, User};

const USER_COLUMNS: &str =
    "id, username, password_hash, native_language, lang_code, api_key, created_at";
const CHAT_COLUMNS: &str = "id, user_id, session_id, role, content, created_at, input_token_count, output_token_count";

/// Opens a pool for a `sqlite://` URL, creating the file and its parent
/// directory when missing.
pub async fn connect_sqlite(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid SQLite URL '{}'", url))?
        .create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    Ok(pool)
}

/// True when `err` was caused by a UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

/// A wrapper around the `SqlitePool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(connect_sqlite(url).await?))
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations/app").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a new user. Fails with a unique violation if the username or
    /// API key is taken; see [`is_unique_violation`].
    pub async fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, password_hash, native_language, lang_code, api_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(&new_user.native_language)
        .bind(&new_user.lang_code)
        .bind(&new_user.api_key)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE api_key = ?"
        ))
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Appends a message to the chat history.
    pub async fn add_chat_message(
        &self,
        user_id: i64,
        session_id: &str,
        role: MessageRole,
        content: &str,
        usage: TokenUsage,
    ) -> Result<ChatHistory> {
        let message = sqlx::query_as::<_, ChatHistory>(&format!(
            r#"
            INSERT INTO chat_history (user_id, session_id, role, content, created_at, input_token_count, output_token_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {CHAT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(Utc::now())
        .bind(i64::from(usage.input_tokens))
        .bind(i64::from(usage.output_tokens))
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    /// The last `limit` messages of a session, oldest first.
    pub async fn recent_chat_messages(
        &self,
        user_id: i64,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<ChatHistory>> {
        let mut messages = sqlx::query_as::<_, ChatHistory>(&format!(
            r#"
            SELECT {CHAT_COLUMNS}
            FROM chat_history
            WHERE user_id = ? AND session_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#
        ))
        .bind(user_id)
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Every message a user has exchanged, oldest first.
    pub async fn list_chat_messages(&self, user_id: i64) -> Result<Vec<ChatHistory>> {
        let messages = sqlx::query_as::<_, ChatHistory>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chat_history WHERE user_id = ? ORDER BY id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_db(dir: &TempDir) -> Db {
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        let db = Db::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn new_user(username: &str, api_key: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            native_language: "Malayalam".to_string(),
            lang_code: "Mal".to_string(),
            api_key: api_key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        let created = db.create_user(&new_user("anu", "key-1")).await.unwrap();
        assert_eq!(created.username, "anu");

        let by_name = db.find_user_by_username("anu").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);

        let by_key = db.find_user_by_api_key("key-1").await.unwrap().unwrap();
        assert_eq!(by_key.id, created.id);

        assert!(db.find_user_by_api_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_is_unique_violation() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;

        db.create_user(&new_user("anu", "key-1")).await.unwrap();
        let err = db.create_user(&new_user("anu", "key-2")).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_chat_history_window() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let user = db.create_user(&new_user("anu", "key-1")).await.unwrap();

        for i in 0..5 {
            db.add_chat_message(
                user.id,
                "1_session",
                MessageRole::User,
                &format!("question {}", i),
                TokenUsage::default(),
            )
            .await
            .unwrap();
        }
        let answer = db
            .add_chat_message(
                user.id,
                "1_session",
                MessageRole::Assistant,
                "answer",
                TokenUsage {
                    input_tokens: 100,
                    output_tokens: 20,
                },
            )
            .await
            .unwrap();
        assert_eq!(answer.input_token_count, 100);
        assert_eq!(answer.role, MessageRole::Assistant);

        let recent = db
            .recent_chat_messages(user.id, "1_session", 3)
            .await
            .unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question 3", "question 4", "answer"]);

        assert!(
            db.recent_chat_messages(user.id, "other_session", 3)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(db.list_chat_messages(user.id).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_connect_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nested/app.db").display());
        let db = Db::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        assert!(dir.path().join("nested/app.db").exists());
    }
}
