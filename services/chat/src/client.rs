//! HTTP client for the tutor API.

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{detail} (HTTP {status})")]
    Api { status: StatusCode, detail: String },
    #[error("Server reported an error while streaming: {0}")]
    Stream(String),
    #[error("Malformed event stream: {0}")]
    EventStream(#[from] EventStreamError<reqwest::Error>),
    #[error("Not logged in")]
    MissingApiKey,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub native_language: String,
    pub lang_code: String,
}

#[derive(Debug, Deserialize)]
struct ApiKeyBody {
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct InteractBody {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Deserialize)]
pub struct Memory {
    pub memory: String,
}

#[derive(Debug, Deserialize)]
struct MemoriesBody {
    chat_history: Vec<Memory>,
}

pub struct TutorClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TutorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn api_key(&self) -> Result<&str, ClientError> {
        self.api_key.as_deref().ok_or(ClientError::MissingApiKey)
    }

    /// Registers a learner and returns their API key.
    pub async fn register(&self, registration: &Registration) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/register"))
            .json(registration)
            .send()
            .await?;
        Ok(check(response).await?.json::<ApiKeyBody>().await?.api_key)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/login"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        Ok(check(response).await?.json::<ApiKeyBody>().await?.api_key)
    }

    pub async fn interact(&self, query: &str) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/interact"))
            .header(API_KEY_HEADER, self.api_key()?)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;
        Ok(check(response).await?.json::<InteractBody>().await?.response)
    }

    /// Streams an answer, calling `on_chunk` for each piece of text as it
    /// arrives. Returns the full answer.
    pub async fn stream(
        &self,
        query: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/stream"))
            .header(API_KEY_HEADER, self.api_key()?)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;
        let response = check(response).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut answer = String::new();
        while let Some(event) = events.next().await {
            let event = event?;
            if event.event == "error" {
                return Err(ClientError::Stream(event.data));
            }
            on_chunk(&event.data);
            answer.push_str(&event.data);
        }
        debug!(chars = answer.len(), "Stream finished");
        Ok(answer)
    }

    pub async fn memories(&self) -> Result<Vec<Memory>, ClientError> {
        let response = self
            .http
            .post(self.url("/chathistory"))
            .header(API_KEY_HEADER, self.api_key()?)
            .send()
            .await?;
        Ok(check(response).await?.json::<MemoriesBody>().await?.chat_history)
    }
}

/// Turns a non-success response into `ClientError::Api` using the `detail` body.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.detail)
        .unwrap_or(text);
    Err(ClientError::Api { status, detail })
}
