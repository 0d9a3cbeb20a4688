//! HTTP collaborators: file storage, code runner and suggestion service.
//!
//! ```text
//! GET  /rooms/{roomId}/files            -> [File]
//! POST /files        {filename, roomId} -> File
//! PUT  /files/{id}   {content}          -> ok
//! POST /rooms                           -> {roomId}
//! POST /run          {code}             -> {output}
//! POST /autocomplete {code, cursorPosition, language} -> {suggestion?}
//! ```
//!
//! Each concern is a trait so a session can be wired to fakes; [`HttpBackend`]
//! implements all of them over one `reqwest` client.

use std::sync::Arc;

use async_trait::async_trait;
use codecollab_core::{File, FileId, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::completion::{CompletionRequest, SuggestionOracle};
use crate::config::SessionConfig;

/// Collaborator request errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Room and file persistence.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_files(&self, room: &RoomId) -> Result<Vec<File>, ApiError>;
    async fn create_file(&self, room: &RoomId, filename: &str) -> Result<File, ApiError>;
    async fn save_file(&self, id: FileId, content: &str) -> Result<(), ApiError>;
    async fn create_room(&self) -> Result<RoomId, ApiError>;
}

/// Code execution.
#[async_trait]
pub trait RunnerApi: Send + Sync {
    /// Run `code` and return its captured output.
    async fn run(&self, code: &str) -> Result<String, ApiError>;
}

/// The set of collaborators a session talks to.
#[derive(Clone)]
pub struct Backend {
    pub storage: Arc<dyn StorageApi>,
    pub runner: Arc<dyn RunnerApi>,
    pub oracle: Arc<dyn SuggestionOracle>,
}

impl Backend {
    /// All three collaborators served by the HTTP backend in `config`.
    pub fn http(config: &SessionConfig) -> Result<Self, ApiError> {
        let backend = Arc::new(HttpBackend::new(config)?);
        Ok(Self {
            storage: backend.clone(),
            runner: backend.clone(),
            oracle: backend,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFileBody<'a> {
    filename: &'a str,
    room_id: &'a RoomId,
}

#[derive(Serialize)]
struct SaveFileBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct RunBody<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
struct RunResponse {
    output: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_id: String,
}

#[derive(Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    suggestion: Option<String>,
}

/// `reqwest` client for the backend at `SessionConfig::backend_url`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &SessionConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, endpoint: &str) -> Result<reqwest::Response, ApiError> {
        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, endpoint: &str) -> Result<T, ApiError> {
        let resp = self.send(request, endpoint).await?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl StorageApi for HttpBackend {
    async fn list_files(&self, room: &RoomId) -> Result<Vec<File>, ApiError> {
        let path = format!("/rooms/{room}/files");
        self.json(self.client.get(self.url(&path)), &path).await
    }

    async fn create_file(&self, room: &RoomId, filename: &str) -> Result<File, ApiError> {
        let body = CreateFileBody { filename, room_id: room };
        self.json(self.client.post(self.url("/files")).json(&body), "/files").await
    }

    async fn save_file(&self, id: FileId, content: &str) -> Result<(), ApiError> {
        let path = format!("/files/{id}");
        let body = SaveFileBody { content };
        self.send(self.client.put(self.url(&path)).json(&body), &path).await?;
        Ok(())
    }

    async fn create_room(&self) -> Result<RoomId, ApiError> {
        let resp: CreateRoomResponse = self.json(self.client.post(self.url("/rooms")), "/rooms").await?;
        RoomId::parse(&resp.room_id).map_err(|e| ApiError::Unexpected(e.to_string()))
    }
}

#[async_trait]
impl RunnerApi for HttpBackend {
    async fn run(&self, code: &str) -> Result<String, ApiError> {
        let resp: RunResponse = self
            .json(self.client.post(self.url("/run")).json(&RunBody { code }), "/run")
            .await?;
        Ok(resp.output)
    }
}

#[async_trait]
impl SuggestionOracle for HttpBackend {
    async fn suggest(&self, request: &CompletionRequest) -> Result<Option<String>, ApiError> {
        let resp: SuggestionResponse = self
            .json(self.client.post(self.url("/autocomplete")).json(request), "/autocomplete")
            .await?;
        Ok(resp.suggestion)
    }
}
