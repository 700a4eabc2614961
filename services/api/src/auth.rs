//! Authentication
//!
//! Passwords are stored as bcrypt hashes. Each registered user receives a
//! random API key which must accompany every protected request in the
//! `x-api-key` header.

use anyhow::Context;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{Db, is_unique_violation},
    handlers::ApiError,
    models::{NewUser, RegisterPayload, User},
    state::AppState,
};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Username already registered")]
    Conflict,
    #[error("Incorrect username or password")]
    BadCredentials,
    #[error("API key is missing")]
    MissingApiKey,
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct AuthService {
    db: Arc<Db>,
    hash_cost: u32,
}

impl AuthService {
    pub fn new(db: Arc<Db>, hash_cost: u32) -> Self {
        Self { db, hash_cost }
    }

    /// Creates a user and returns their freshly issued API key.
    pub async fn register(&self, payload: &RegisterPayload) -> Result<String, AuthError> {
        let username = payload.username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("Username must not be empty".to_string()));
        }
        if payload.password.is_empty() {
            return Err(AuthError::Validation("Password must not be empty".to_string()));
        }

        if self.db.find_user_by_username(username).await?.is_some() {
            return Err(AuthError::Conflict);
        }

        let new_user = NewUser {
            username: username.to_string(),
            password_hash: hash_password(payload.password.clone(), self.hash_cost).await?,
            native_language: payload.native_language.trim().to_string(),
            lang_code: payload.lang_code.trim().to_string(),
            api_key: generate_api_key(),
        };

        // A concurrent registration can still win the race for the username.
        let user = self.db.create_user(&new_user).await.map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::Conflict
            } else {
                AuthError::Internal(e)
            }
        })?;

        info!(user_id = user.id, username = %user.username, "Registered new user");
        Ok(user.api_key)
    }

    /// Verifies credentials and returns the user's existing API key.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .db
            .find_user_by_username(username.trim())
            .await?
            .ok_or(AuthError::BadCredentials)?;

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            warn!(user_id = user.id, "Login rejected: wrong password");
            return Err(AuthError::BadCredentials);
        }
        Ok(user.api_key)
    }

    /// Resolves an API key to its user.
    pub async fn authenticate(&self, api_key: Option<&str>) -> Result<User, AuthError> {
        let api_key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::MissingApiKey)?;
        self.db
            .find_user_by_api_key(api_key)
            .await?
            .ok_or(AuthError::InvalidApiKey)
    }
}

pub fn generate_api_key() -> String {
    Uuid::new_v4().to_string()
}

/// Hashes on the blocking pool; bcrypt is deliberately slow.
pub async fn hash_password(password: String, cost: u32) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")
}

pub async fn verify_password(password: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("Password verification task failed")?
        .context("Stored password hash is malformed")
}

/// The authenticated caller, resolved from the `x-api-key` header.
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        let user = state
            .auth
            .authenticate(api_key)
            .await
            .map_err(ApiError::from_auth)?;
        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_COST: u32 = 4;

    async fn test_service(dir: &TempDir) -> AuthService {
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        let db = Db::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        AuthService::new(Arc::new(db), TEST_COST)
    }

    fn payload(username: &str, password: &str) -> RegisterPayload {
        RegisterPayload {
            username: username.to_string(),
            password: password.to_string(),
            native_language: "Malayalam".to_string(),
            lang_code: "Mal".to_string(),
        }
    }

    #[tokio::test]
    async fn test_password_hash_round_trip() {
        let hash = hash_password("s3cret".into(), TEST_COST).await.unwrap();
        assert_ne!(hash, "s3cret");
        assert!(verify_password("s3cret".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hash).await.unwrap());
    }

    #[test]
    fn test_api_keys_are_unique() {
        assert_ne!(generate_api_key(), generate_api_key());
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let dir = TempDir::new().unwrap();
        let auth = test_service(&dir).await;

        auth.register(&payload("anu", "pw")).await.unwrap();
        let err = auth.register(&payload("anu", "other")).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
    }

    #[tokio::test]
    async fn test_register_rejects_blank_fields() {
        let dir = TempDir::new().unwrap();
        let auth = test_service(&dir).await;

        assert!(matches!(
            auth.register(&payload("  ", "pw")).await.unwrap_err(),
            AuthError::Validation(_)
        ));
        assert!(matches!(
            auth.register(&payload("anu", "")).await.unwrap_err(),
            AuthError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_login_returns_registration_key() {
        let dir = TempDir::new().unwrap();
        let auth = test_service(&dir).await;

        let api_key = auth.register(&payload("anu", "pw")).await.unwrap();
        assert_eq!(auth.login("anu", "pw").await.unwrap(), api_key);
        // Not rotated by logging in again.
        assert_eq!(auth.login("anu", "pw").await.unwrap(), api_key);

        assert!(matches!(
            auth.login("anu", "nope").await.unwrap_err(),
            AuthError::BadCredentials
        ));
        assert!(matches!(
            auth.login("nobody", "pw").await.unwrap_err(),
            AuthError::BadCredentials
        ));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let dir = TempDir::new().unwrap();
        let auth = test_service(&dir).await;

        let api_key = auth.register(&payload("anu", "pw")).await.unwrap();
        let user = auth.authenticate(Some(api_key.as_str())).await.unwrap();
        assert_eq!(user.username, "anu");
        assert_eq!(user.native_language, "Malayalam");

        assert!(matches!(
            auth.authenticate(None).await.unwrap_err(),
            AuthError::MissingApiKey
        ));
        assert!(matches!(
            auth.authenticate(Some("")).await.unwrap_err(),
            AuthError::MissingApiKey
        ));
        assert!(matches!(
            auth.authenticate(Some("not-a-key")).await.unwrap_err(),
            AuthError::InvalidApiKey
        ));
    }
}
