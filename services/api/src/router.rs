//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the SSE endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ChatHistory, ChatHistoryResponse, ErrorResponse, InteractResponse, LoginForm,
        LoginResponse, MessageRole, QueryPayload, RegisterPayload, RegisterResponse, UserMemory,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register,
        handlers::login,
        handlers::interact,
        handlers::stream,
        handlers::chat_history,
        handlers::list_messages,
    ),
    components(
        schemas(
            RegisterPayload, RegisterResponse, LoginForm, LoginResponse, QueryPayload,
            InteractResponse, ChatHistoryResponse, UserMemory, ChatHistory, MessageRole,
            ErrorResponse
        )
    ),
    tags(
        (name = "Grammar Tutor API", description = "Registration and tutoring turns for the English grammar tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/interact", post(handlers::interact))
        .route("/stream", post(handlers::stream))
        .route("/chathistory", post(handlers::chat_history))
        .route("/messages", get(handlers::list_messages))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
