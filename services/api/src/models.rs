//! API and Database Models
//!
//! This module defines the core data structures used for both database mapping
//! with `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A registered learner. The password hash never leaves the server.
#[derive(Serialize, FromRow, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub native_language: String,
    pub lang_code: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a new `User`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub native_language: String,
    pub lang_code: String,
    pub api_key: String,
}

/// One stored chat message.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct ChatHistory {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    #[schema(value_type = String, example = "user")]
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub input_token_count: i64,
    pub output_token_count: i64,
}

/// A fact the tutor remembers about a learner.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct UserMemory {
    pub id: i64,
    pub memory: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterPayload {
    #[schema(example = "anu")]
    pub username: String,
    pub password: String,
    #[schema(example = "Malayalam")]
    pub native_language: String,
    #[schema(example = "Mal")]
    pub lang_code: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct QueryPayload {
    #[schema(example = "Can you explain articles?")]
    pub query: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct RegisterResponse {
    pub message: String,
    pub api_key: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct LoginResponse {
    pub api_key: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct InteractResponse {
    pub response: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ChatHistoryResponse {
    pub chat_history: Vec<UserMemory>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_role_serialization() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
        let role: MessageRole = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, MessageRole::Assistant);
    }

    #[test]
    fn test_message_role_display() {
        assert_eq!(format!("{}", MessageRole::User), "user");
        assert_eq!(format!("{}", MessageRole::Assistant), "assistant");
    }

    #[test]
    fn test_invalid_role_deserialization() {
        let result: Result<MessageRole, _> = serde_json::from_str("\"system\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_user_serialization_hides_secrets() {
        let user = User {
            id: 1,
            username: "anu".to_string(),
            password_hash: "$2b$12$secret".to_string(),
            native_language: "Malayalam".to_string(),
            lang_code: "Mal".to_string(),
            api_key: "3f6c-key".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("anu"));
        assert!(json.contains("Malayalam"));
        assert!(!json.contains("secret"));
        assert!(!json.contains("3f6c-key"));
    }

    #[test]
    fn test_register_payload_requires_all_fields() {
        let json = r#"{"username": "anu", "password": "pw", "native_language": "Malayalam", "lang_code": "Mal"}"#;
        let payload: RegisterPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.username, "anu");
        assert_eq!(payload.lang_code, "Mal");

        let missing = r#"{"username": "anu", "password": "pw"}"#;
        assert!(serde_json::from_str::<RegisterPayload>(missing).is_err());
    }

    #[test]
    fn test_query_payload_missing_field() {
        let result: Result<QueryPayload, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            detail: "Invalid API key".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"detail":"Invalid API key"}"#
        );
    }

    #[test]
    fn test_chat_history_datetime_handling() {
        let specific_time = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let row = ChatHistory {
            id: 3,
            user_id: 1,
            session_id: "1_session".to_string(),
            role: MessageRole::Assistant,
            content: "Articles are 'a', 'an' and 'the'.".to_string(),
            created_at: specific_time,
            input_token_count: 312,
            output_token_count: 40,
        };

        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"assistant\""));
        let deserialized: ChatHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.created_at, specific_time);
        assert_eq!(deserialized.output_token_count, 40);
    }
}
