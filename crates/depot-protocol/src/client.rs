use std::time::Duration;

use reqwest::StatusCode;

use crate::routes;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("version not found: {0}")]
    NotFound(String),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Outcome of one latest-version poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Latest(String),
    NotLoaded,
    Throttled,
    Unexpected(u16),
}

/// Polling client for a depot server.
#[derive(Debug, Clone)]
pub struct DepotClient {
    base_url: String,
    http: reqwest::Client,
}

impl DepotClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn latest_version(&self) -> Result<Poll, ClientError> {
        let url = format!("{}{}", self.base_url, routes::LATEST_VERSION);
        let response = self.http.get(url).send().await?;
        classify(response).await
    }

    /// Ask for the latest version while reporting the version this client runs.
    pub async fn report_version(&self, current: &str) -> Result<Poll, ClientError> {
        let url = format!("{}{}", self.base_url, routes::VERSION_REPORT);
        let response = self
            .http
            .get(url)
            .query(&[("q", current)])
            .send()
            .await?;
        classify(response).await
    }

    pub async fn download(&self, version: &str) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}{}", self.base_url, routes::download_path(version));
        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(version.to_string())),
            other => Err(ClientError::Status(other.as_u16())),
        }
    }
}

async fn classify(response: reqwest::Response) -> Result<Poll, ClientError> {
    match response.status() {
        StatusCode::OK => Ok(Poll::Latest(response.text().await?)),
        StatusCode::SERVICE_UNAVAILABLE => Ok(Poll::NotLoaded),
        StatusCode::TOO_MANY_REQUESTS => Ok(Poll::Throttled),
        other => Ok(Poll::Unexpected(other.as_u16())),
    }
}
