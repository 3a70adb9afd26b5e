//! Fetching documents from remote URLs.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{FetchError, RawDocument};
use crate::deployment::Reference;

/// Connect timeout for URL references.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a response body quoted in an error.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// HTTP client for `url` references.
#[derive(Clone)]
pub struct UrlFetcher {
    client: Client,
}

impl UrlFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, reference: &Reference) -> Result<RawDocument, FetchError> {
        let url = reqwest::Url::parse(&reference.name).map_err(|e| FetchError::Malformed {
            reference: reference.clone(),
            message: e.to_string(),
        })?;

        log::debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                reference: reference.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(reference.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Transport {
                reference: reference.clone(),
                message: format!("HTTP {}: {}", status, truncate(&body)),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
            reference: reference.clone(),
            message: e.to_string(),
        })?;

        Ok(RawDocument::new(reference.clone(), bytes.to_vec()))
    }
}

fn truncate(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}
