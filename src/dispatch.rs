//! Command backend dispatch
//!
//! Forwards a transcript to the remote command backend and maps every
//! outcome, including transport faults, onto a [`DispatchReply`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reply used when the backend accepted the command but returned no text
pub const EMPTY_REPLY: &str = "I processed that, but have no reply.";

/// Why a dispatch produced no reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    /// Connection, DNS or timeout failure
    Network(String),
    /// Backend answered with a non-success status
    Status(u16),
    /// Backend answered 2xx with an undecodable body
    Malformed(String),
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Status(code) => write!(f, "backend returned status {code}"),
            Self::Malformed(msg) => write!(f, "malformed backend response: {msg}"),
        }
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReply {
    /// Backend reply text
    Reply(String),
    /// No usable reply
    Failure(DispatchFailure),
}

impl DispatchReply {
    /// Reply text, if the dispatch succeeded
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Reply(text) => Some(text),
            Self::Failure(_) => None,
        }
    }

    /// True when the dispatch failed
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Sends transcripts to a command backend
///
/// Implementations never fail: every fault becomes a
/// [`DispatchReply::Failure`].
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Send `text` and wait for the backend's reply
    async fn dispatch(&self, text: &str) -> DispatchReply;
}

/// Request body sent to the backend
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
}

/// Response body returned by the backend
#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    response: Option<CommandResponseText>,
}

#[derive(Debug, Deserialize)]
struct CommandResponseText {
    #[serde(default)]
    text: Option<String>,
}

/// Dispatches commands over HTTP as `POST {"command": "..."}`
#[derive(Debug)]
pub struct HttpCommandDispatcher {
    client: reqwest::Client,
    url: String,
    api_token: Option<SecretString>,
}

impl HttpCommandDispatcher {
    /// Create a dispatcher for `url` with a per-request `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("command backend URL is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            api_token: None,
        })
    }

    /// Send a bearer token with every request
    #[must_use]
    pub fn with_api_token(mut self, token: Option<SecretString>) -> Self {
        self.api_token = token.filter(|t| !t.expose_secret().is_empty());
        self
    }

    /// Get the backend URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CommandDispatcher for HttpCommandDispatcher {
    async fn dispatch(&self, text: &str) -> DispatchReply {
        tracing::debug!(url = %self.url, command = text, "dispatching command");

        let mut request = self
            .client
            .post(&self.url)
            .json(&CommandRequest { command: text });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "command backend unreachable");
                return DispatchReply::Failure(DispatchFailure::Network(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "command backend error");
            return DispatchReply::Failure(DispatchFailure::Status(status.as_u16()));
        }

        let body: CommandResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_decode() => {
                tracing::error!(error = %e, "failed to parse command response");
                return DispatchReply::Failure(DispatchFailure::Malformed(e.to_string()));
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read command response");
                return DispatchReply::Failure(DispatchFailure::Network(e.to_string()));
            }
        };

        let reply = body
            .response
            .and_then(|r| r.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_string());

        tracing::info!(reply = %reply, "command backend replied");
        DispatchReply::Reply(reply)
    }
}
