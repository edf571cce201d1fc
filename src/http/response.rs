//! Buffered API response

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::types::{ClientError, Result};

/// A successful response with its body read into memory
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// Read a reqwest response; non-2xx statuses become `ClientError::Status`
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Into::into)
    }

    /// Body as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Challenge {
        id: u32,
        title: String,
    }

    #[test]
    fn test_json_decode() {
        let response = ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(br#"{"id":7,"title":"Morning run"}"#),
        };
        let challenge: Challenge = response.json().unwrap();
        assert_eq!(challenge.id, 7);
        assert_eq!(challenge.title, "Morning run");
        assert!(response.json::<Vec<u32>>().is_err());
    }
}
