//! Outbound request descriptor
//!
//! Holds everything needed to send (and resend) a call: method, URL, headers
//! and a buffered body, plus the at-most-once authorization retry marker.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::Serialize;

use crate::types::Result;

/// Custom header carrying the locally stored device identifier
pub const DEVICE_ID_HEADER: &str = "device-id";

/// A resendable API request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    /// Add a header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Raw body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with a matching content type
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether this request already went through authorization recovery
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Replace the bearer credential
    pub(crate) fn set_bearer(&mut self, token: &str) -> Result<()> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub(crate) fn set_device_id(&mut self, device_id: &str) -> Result<()> {
        let value = HeaderValue::from_str(device_id)?;
        self.headers
            .insert(HeaderName::from_static(DEVICE_ID_HEADER), value);
        Ok(())
    }

    /// Token currently attached as `Authorization: Bearer <token>`
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    /// Build the wire request for the given client
    pub(crate) fn to_reqwest(&self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = http
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        match &self.body {
            Some(body) => builder.body(body.clone()),
            None => builder,
        }
    }
}
