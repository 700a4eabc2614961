//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for registration,
//! login, tutoring turns and the learner's history.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tracing::{Instrument, error};

use crate::{
    auth::{AuthError, CurrentUser},
    models::{
        ChatHistory, ChatHistoryResponse, ErrorResponse, InteractResponse, LoginForm,
        LoginResponse, QueryPayload, RegisterPayload, RegisterResponse,
    },
    state::AppState,
    turn::{StreamEvent, run_turn},
};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    pub fn from_auth(err: AuthError) -> Self {
        match err {
            AuthError::Conflict | AuthError::BadCredentials | AuthError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            AuthError::MissingApiKey | AuthError::InvalidApiKey => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::Internal(e) => ApiError::InternalServerError(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn require_query(payload: QueryPayload) -> Result<String, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(ApiError::BadRequest("Query must not be empty".to_string()));
    }
    Ok(payload.query)
}

/// Register a new learner.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterPayload,
    responses(
        (status = 200, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Username already registered or invalid input", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterPayload>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let api_key = state
        .auth
        .register(&payload)
        .await
        .map_err(ApiError::from_auth)?;
    Ok(Json(RegisterResponse {
        message: "User registered successfully".to_string(),
        api_key,
    }))
}

/// Exchange a username and password for the learner's API key.
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Incorrect username or password", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Json<LoginResponse>, ApiError> {
    let api_key = state
        .auth
        .login(&form.username, &form.password)
        .await
        .map_err(ApiError::from_auth)?;
    Ok(Json(LoginResponse { api_key }))
}

/// Run one tutoring turn and return the complete answer.
#[utoipa::path(
    post,
    path = "/interact",
    request_body = QueryPayload,
    responses(
        (status = 200, description = "Tutor answer", body = InteractResponse),
        (status = 400, description = "Empty query", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-api-key" = String, Header, description = "The learner's API key")
    )
)]
pub async fn interact(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<InteractResponse>, ApiError> {
    let query = require_query(payload)?;
    let outcome = run_turn(&state, &user, &query, None).await?;
    Ok(Json(InteractResponse {
        response: outcome.response,
    }))
}

/// Run one tutoring turn and stream the answer as server-sent events.
///
/// Each `data:` event carries one text chunk. A failure after the stream has
/// started is reported as an `error` event.
#[utoipa::path(
    post,
    path = "/stream",
    request_body = QueryPayload,
    responses(
        (status = 200, description = "Answer chunks", content_type = "text/event-stream", body = String),
        (status = 400, description = "Empty query", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse)
    ),
    params(
        ("x-api-key" = String, Header, description = "The learner's API key")
    )
)]
pub async fn stream(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<QueryPayload>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let query = require_query(payload)?;
    let (tx, rx) = mpsc::channel::<StreamEvent>(64);

    tokio::spawn(
        async move {
            if let Err(e) = run_turn(&state, &user, &query, Some(&tx)).await {
                error!(error = ?e, "Streaming turn failed");
                let _ = tx
                    .send(StreamEvent::Error(
                        "An internal server error occurred.".to_string(),
                    ))
                    .await;
            }
        }
        .in_current_span(),
    );

    let events = ReceiverStream::new(rx).map(|event| {
        let event = match event {
            // SSE cannot carry carriage returns.
            StreamEvent::Chunk(chunk) => Event::default().data(chunk.replace('\r', "")),
            StreamEvent::Error(message) => Event::default().event("error").data(message),
        };
        Ok(event)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// List what the tutor remembers about the learner.
#[utoipa::path(
    post,
    path = "/chathistory",
    responses(
        (status = 200, description = "Stored learner memories", body = ChatHistoryResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-api-key" = String, Header, description = "The learner's API key")
    )
)]
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let chat_history = state.agent_store.list_memories(user.id).await?;
    Ok(Json(ChatHistoryResponse { chat_history }))
}

/// List every message exchanged with the tutor, oldest first.
#[utoipa::path(
    get,
    path = "/messages",
    responses(
        (status = 200, description = "Chat transcript", body = [ChatHistory]),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-api-key" = String, Header, description = "The learner's API key")
    )
)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ChatHistory>>, ApiError> {
    let messages = state.db.list_chat_messages(user.id).await?;
    Ok(Json(messages))
}
