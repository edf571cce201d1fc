//! Authenticated API client
//!
//! Every call goes through two stages:
//!
//! 1. **Request stage** - attach `Authorization: Bearer <token>` and
//!    `Device-Id` from the session store. Never fails the call.
//! 2. **Response stage** - on a 401 for a request not yet retried, recover:
//!    - the refresh endpoint itself failing ends the session;
//!    - with a refresh in flight the request is queued;
//!    - otherwise this request leads one refresh, after which the queue is
//!      replayed (callers resumed in enqueue order) and the leader is resent
//!      last.
//!
//! Any other failure, or a second 401, is returned to the caller unchanged.

use bytes::Bytes;
use futures_util::stream::{FuturesOrdered, StreamExt};
use reqwest::cookie::Jar;
use reqwest::{Client, Method, Url};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::coordinator::{Admission, PendingRequest, RefreshCoordinator};
use super::request::ApiRequest;
use super::response::ApiResponse;
use crate::config::ClientConfig;
use crate::session::{HttpSessionRefresher, SessionManager, TokenStore};
use crate::types::{ClientError, Result};

/// Authenticated REST client with transparent token renewal
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    http: Client,
    refresh_url: Url,
    session: Arc<SessionManager>,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// Build a client, its refresher and session from configuration.
    ///
    /// The API client and the refresher share one cookie jar, so the refresh
    /// cookie set by the login response is sent to the refresh endpoint.
    pub fn connect(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let refresher = HttpSessionRefresher::new(
            config.refresh_url()?,
            Arc::clone(&cookies),
            config.refresh_timeout,
        )?;
        let session = Arc::new(SessionManager::new(
            store,
            Arc::new(refresher),
            config.refresh_timeout,
        ));
        let http = Client::builder()
            .cookie_provider(cookies)
            .timeout(config.request_timeout)
            .build()?;

        Self::with_parts(config, http, session)
    }

    /// Assemble from an existing HTTP client and session
    pub fn with_parts(config: ClientConfig, http: Client, session: Arc<SessionManager>) -> Result<Self> {
        let refresh_url = config.refresh_url()?;
        info!(base_url = %config.base_url, refresh_url = %refresh_url, "API client created");

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                refresh_url,
                session,
                coordinator: RefreshCoordinator::new(),
            }),
        })
    }

    /// Session shared with other transports (e.g. the chat socket)
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.inner.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start a request for `path` relative to the API base URL
    pub fn request(&self, method: Method, path: &str) -> Result<ApiRequest> {
        Ok(ApiRequest::new(method, self.inner.config.resolve(path)?))
    }

    /// Send a request through the pipeline
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut request = request;
        self.inner.prepare(&mut request);

        match self.inner.dispatch(&request).await {
            Err(err) if err.is_unauthorized() && !request.is_retried() => {
                Arc::clone(&self.inner).recover(request, err).await
            }
            outcome => outcome,
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.execute(self.request(Method::GET, path)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.execute(self.request(Method::DELETE, path)?).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.execute(self.request(Method::POST, path)?.json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.execute(self.request(Method::PUT, path)?.json(body)?).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.execute(self.request(Method::PATCH, path)?.json(body)?).await
    }

    /// POST an opaque body (e.g. a multipart proof photo built by the caller)
    pub async fn post_bytes(&self, path: &str, body: Bytes) -> Result<ApiResponse> {
        self.execute(self.request(Method::POST, path)?.body(body)).await
    }
}

impl ClientInner {
    /// Request stage: attach credentials from the session store
    fn prepare(&self, request: &mut ApiRequest) {
        if let Some(token) = self.session.access_token() {
            if let Err(e) = request.set_bearer(&token) {
                warn!(error = %e, "Stored access token is not a valid header value");
            }
        }
        if let Some(device_id) = self.session.device_id() {
            if let Err(e) = request.set_device_id(&device_id) {
                warn!(error = %e, "Stored device id is not a valid header value");
            }
        }
    }

    /// One network round trip, no recovery
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        debug!(method = %request.method(), url = %request.url(), retried = request.is_retried(), "Sending request");
        let response = request.to_reqwest(&self.http).send().await?;
        ApiResponse::read(response).await
    }

    fn is_refresh_endpoint(&self, url: &Url) -> bool {
        url.origin() == self.refresh_url.origin() && url.path() == self.refresh_url.path()
    }

    /// Response stage for a 401 on a request that has not been retried
    async fn recover(self: Arc<Self>, request: ApiRequest, err: ClientError) -> Result<ApiResponse> {
        if self.is_refresh_endpoint(request.url()) {
            warn!("Refresh endpoint rejected the session");
            let rejected = self.coordinator.reject_queued(&err).await;
            debug!(rejected, "Rejected queued requests");
            self.session.expire(&err.to_string());
            return Err(err);
        }

        let session = Arc::clone(&self.session);
        let admission = self
            .coordinator
            .admit(request, move || session.access_token())
            .await;
        match admission {
            Admission::Queued(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ClientError::Internal("Queued request dropped".into()))),
            Admission::Replay { mut request, token } => {
                debug!(url = %request.url(), "Token renewed since send, replaying");
                request.mark_retried();
                request.set_bearer(&token)?;
                self.dispatch(&request).await
            }
            Admission::Leader(mut request) => {
                request.mark_retried();
                let (reply, rx) = oneshot::channel();
                // Settling runs detached so a dropped caller cannot strand the queue
                tokio::spawn(async move {
                    let outcome = self.settle_refresh(request).await;
                    let _ = reply.send(outcome);
                });
                rx.await
                    .unwrap_or_else(|_| Err(ClientError::Internal("Refresh task dropped".into())))
            }
        }
    }

    /// Run the single refresh, drain the queue, then resend the leader.
    ///
    /// Every exit path leaves the coordinator idle: either the drain observed
    /// an empty queue or `fail` rejected what was left.
    async fn settle_refresh(&self, mut leader: ApiRequest) -> Result<ApiResponse> {
        let token = match self.session.refresh().await {
            Ok(token) => token,
            Err(err) => return Err(self.abandon_refresh(err).await),
        };

        if let Err(err) = leader.set_bearer(&token) {
            return Err(self.abandon_refresh(err).await);
        }

        let mut replayed = 0usize;
        while let Some(batch) = self.coordinator.next_batch().await {
            replayed += batch.len();
            self.replay(batch, &token).await;
        }
        info!(replayed, "Queued requests replayed with renewed token");

        self.dispatch(&leader).await
    }

    /// Reject the queue and release the refresh flag
    async fn abandon_refresh(&self, err: ClientError) -> ClientError {
        let rejected = self.coordinator.fail(&err).await;
        warn!(error = %err, rejected, "Token refresh failed, session terminated");
        err
    }

    /// Resend a batch concurrently; callers are resumed in enqueue order
    async fn replay(&self, batch: Vec<PendingRequest>, token: &str) {
        let mut in_flight: FuturesOrdered<_> = batch
            .into_iter()
            .map(|pending| async move {
                let mut request = pending.request.clone();
                request.mark_retried();
                let outcome = match request.set_bearer(token) {
                    Ok(()) => self.dispatch(&request).await,
                    Err(e) => Err(e),
                };
                (pending, outcome)
            })
            .collect();

        while let Some((pending, outcome)) = in_flight.next().await {
            pending.resolve(outcome);
        }
    }
}
