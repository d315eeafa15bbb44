//! Session Identity and Server API
//!
//! A [`Session`] is created once per client through the server's
//! session-creation endpoint and never changes afterwards. The same API
//! serves the history prefetch made right after a session is created.
//!
//! ```text
//! POST /api/sessions                          -> {"session_id", "created_at", ...}
//! GET  /api/sessions/{id}/history?page=N&page_size=M
//!                                             -> {"messages": [...], "has_more": bool}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::messages::{AssembledMessage, MessageStatus, SessionId};
use crate::transport::frame::{parse_timestamp, WireMessage};
use crate::transport::{TransportConfig, TransportError};

/// Default history page size
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Default number of history pages fetched
pub const DEFAULT_MAX_PAGES: u32 = 4;

/// Identity of one conversation with the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Server-issued identifier
    pub id: SessionId,
    /// When the server created the session
    pub created_at: DateTime<Utc>,
}

/// Errors from the session API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be made
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The endpoint URL could not be derived
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        Self::Endpoint(err.to_string())
    }
}

/// Server-side session operations the client depends on
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a new session
    async fn create(&self) -> Result<Session, ApiError>;

    /// Prior messages of a session, oldest first
    async fn fetch_history(&self, session_id: &SessionId)
        -> Result<Vec<AssembledMessage>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    session_id: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    has_more: bool,
}

/// [`SessionApi`] over HTTP
#[derive(Clone)]
pub struct HttpSessionApi {
    config: TransportConfig,
    http_client: reqwest::Client,
    page_size: u32,
    max_pages: u32,
}

impl HttpSessionApi {
    /// Create an API client for the configured server
    pub fn new(config: TransportConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Set history paging; both values are clamped to at least 1
    #[must_use]
    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    fn request_timeout(&self) -> Duration {
        self.config.send_timeout()
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create(&self) -> Result<Session, ApiError> {
        let url = self.config.sessions_url()?;
        let response = self
            .http_client
            .post(url)
            .timeout(self.request_timeout())
            .send()
            .await?;
        let created: CreatedSession = Self::check(response).await?.json().await?;

        let session = Session {
            id: SessionId(created.session_id),
            created_at: created
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        };
        tracing::info!(session_id = %session.id, "Session created");
        Ok(session)
    }

    async fn fetch_history(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<AssembledMessage>, ApiError> {
        let url = self.config.history_url(session_id)?;
        let mut messages = Vec::new();

        for page in 1..=self.max_pages {
            let response = self
                .http_client
                .get(url.clone())
                .query(&[("page", page), ("page_size", self.page_size)])
                .timeout(self.request_timeout())
                .send()
                .await?;
            let batch: HistoryPage = Self::check(response).await?.json().await?;

            messages.extend(
                batch
                    .messages
                    .into_iter()
                    .map(|m| m.into_assembled(MessageStatus::Received)),
            );
            if !batch.has_more {
                break;
            }
        }

        tracing::debug!(session_id = %session_id, count = messages.len(), "History fetched");
        Ok(messages)
    }
}
