//! Refresh coordinator
//!
//! Explicit state object for the "refresh in progress" flag and the queue of
//! requests suspended behind it. The flag and queue change together under one
//! lock, which is never held across network I/O.

use std::collections::VecDeque;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use super::request::ApiRequest;
use super::response::ApiResponse;
use crate::types::{ClientError, Result};

/// A suspended caller: the request to resend and the continuation to resume it
pub(crate) struct PendingRequest {
    pub(crate) request: ApiRequest,
    pub(crate) reply: oneshot::Sender<Result<ApiResponse>>,
}

impl PendingRequest {
    /// Resume the caller with `outcome`; a caller that went away is ignored
    pub(crate) fn resolve(self, outcome: Result<ApiResponse>) {
        let _ = self.reply.send(outcome);
    }
}

/// How an unauthorized request proceeds
pub(crate) enum Admission {
    /// A refresh is running; wait on the receiver for the replayed outcome
    Queued(oneshot::Receiver<Result<ApiResponse>>),
    /// The token was already renewed after this request was sent; resend it
    /// with `token`
    Replay { request: ApiRequest, token: String },
    /// This request starts the refresh
    Leader(ApiRequest),
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
}

/// Owner of the refresh flag and the pending-request queue
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what happens to a request that just received a 401.
    ///
    /// `current_token` reads the stored token. It runs under the lock, so a
    /// refresh that completes concurrently is either still flagged here or
    /// its token is already visible.
    pub(crate) async fn admit(
        &self,
        request: ApiRequest,
        current_token: impl FnOnce() -> Option<String>,
    ) -> Admission {
        let mut state = self.state.lock().await;

        if state.refreshing {
            let (reply, rx) = oneshot::channel();
            state.queue.push_back(PendingRequest { request, reply });
            debug!(queued = state.queue.len(), "Refresh in flight, request queued");
            return Admission::Queued(rx);
        }

        if let Some(token) = current_token() {
            if request.bearer_token() != Some(token.as_str()) {
                return Admission::Replay { request, token };
            }
        }

        state.refreshing = true;
        Admission::Leader(request)
    }

    /// Take every queued request in FIFO order.
    ///
    /// Returns `None` and clears the flag once the queue is empty, so a request
    /// queued while an earlier batch is replaying is still picked up here.
    pub(crate) async fn next_batch(&self) -> Option<Vec<PendingRequest>> {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            state.refreshing = false;
            None
        } else {
            Some(state.queue.drain(..).collect())
        }
    }

    /// Settle a failed refresh: reject every queued request and clear the flag
    pub(crate) async fn fail(&self, err: &ClientError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock().await;
            state.refreshing = false;
            state.queue.drain(..).collect()
        };
        Self::reject(drained, err)
    }

    /// Reject every queued request without touching the flag
    pub(crate) async fn reject_queued(&self, err: &ClientError) -> usize {
        let drained: Vec<PendingRequest> = self.state.lock().await.queue.drain(..).collect();
        Self::reject(drained, err)
    }

    /// Whether a refresh is in flight
    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.refreshing
    }

    /// Number of suspended requests
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    fn reject(drained: Vec<PendingRequest>, err: &ClientError) -> usize {
        let count = drained.len();
        for pending in drained {
            pending.resolve(Err(err.clone()));
        }
        count
    }
}
