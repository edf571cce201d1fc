//! Token refresh primitive
//!
//! One operation: exchange the refresh cookie for a new access token. Both
//! the HTTP pipeline and the chat socket reach it through `SessionManager`.

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::HeaderValue;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::types::{ClientError, Result};

/// Exchanges the refresh credential for a new access token
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    /// Returns the new access token, or the failure that ends the session
    async fn refresh(&self) -> Result<String>;
}

/// Refresh endpoint success body
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

/// Refresher calling `POST <refresh_url>` with cookie credentials.
///
/// Uses its own `reqwest::Client`, never the authenticated pipeline, so a
/// failing refresh cannot re-enter recovery. The cookie jar is shared with
/// the API client so the HTTP-only refresh cookie set at login is sent here.
pub struct HttpSessionRefresher {
    http: Client,
    refresh_url: Url,
}

impl HttpSessionRefresher {
    pub fn new(refresh_url: Url, cookies: Arc<Jar>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .cookie_provider(cookies)
            .timeout(timeout)
            .build()?;

        Ok(Self { http, refresh_url })
    }

    pub fn refresh_url(&self) -> &Url {
        &self.refresh_url
    }
}

#[async_trait]
impl SessionRefresher for HttpSessionRefresher {
    async fn refresh(&self) -> Result<String> {
        debug!(url = %self.refresh_url, "Calling refresh endpoint");

        let response = self
            .http
            .post(self.refresh_url.clone())
            .send()
            .await
            .map_err(|e| ClientError::RefreshFailed {
                status: None,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RefreshFailed {
                status: Some(status.as_u16()),
                detail: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let parsed: RefreshResponse =
            response
                .json()
                .await
                .map_err(|e| ClientError::RefreshFailed {
                    status: Some(status.as_u16()),
                    detail: format!("Malformed refresh response: {}", e),
                })?;

        if parsed.access_token.is_empty() {
            return Err(ClientError::RefreshFailed {
                status: Some(status.as_u16()),
                detail: "Refresh response carried an empty token".to_string(),
            });
        }

        // The token travels in `Authorization` and in the chat URI
        if HeaderValue::from_str(&format!("Bearer {}", parsed.access_token)).is_err() {
            return Err(ClientError::RefreshFailed {
                status: Some(status.as_u16()),
                detail: "Refresh response carried a token that is not a valid header value"
                    .to_string(),
            });
        }

        Ok(parsed.access_token)
    }
}
