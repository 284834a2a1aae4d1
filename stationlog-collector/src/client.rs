use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::COOKIE};
use serde::Deserialize;
use stationlog_core::IngestSummary;
use tracing::debug;

pub const COLLECT_SELF_PATH: &str = "/collect-readings/self";

#[derive(Debug, thiserror::Error)]
pub enum IngestClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The request itself was rejected; repeating it will not help.
    #[error("request rejected {status}: {message}")]
    Client { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl IngestClientError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IngestClientError::Client { .. })
    }
}

/// The ingestion surface as seen by the collectors.
#[async_trait]
pub trait IngestionClient: Send + Sync + 'static {
    /// Collects every active device owned by the session's account.
    async fn collect_self(&self) -> Result<IngestSummary, IngestClientError>;
}

#[derive(Debug, Deserialize)]
struct SummaryBody {
    summary: IngestSummary,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Cookie-authenticated client for the stationlog server.
#[derive(Clone)]
pub struct HttpIngestionClient {
    base_url: String,
    session_token: String,
    http: Client,
}

impl HttpIngestionClient {
    pub fn new(
        base_url: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Result<Self, IngestClientError> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session_token: session_token.into(),
            http,
        })
    }
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    async fn collect_self(&self) -> Result<IngestSummary, IngestClientError> {
        let url = format!("{}{}", self.base_url, COLLECT_SELF_PATH);
        debug!(%url, "requesting collection");

        let response = self
            .http
            .post(&url)
            .header(COOKIE, format!("session={}", self.session_token))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        decode_response(status, &body)
    }
}

fn decode_response(status: StatusCode, body: &str) -> Result<IngestSummary, IngestClientError> {
    if status.is_success() {
        return serde_json::from_str::<SummaryBody>(body)
            .map(|b| b.summary)
            .map_err(|e| IngestClientError::Decode(e.to_string()));
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let status = status.as_u16();

    if (400..500).contains(&status) {
        Err(IngestClientError::Client { status, message })
    } else {
        Err(IngestClientError::Server { status, message })
    }
}
