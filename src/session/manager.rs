//! Session manager
//!
//! Owns the token store, the refresher and the session event channel, and
//! guarantees at most one refresh call per session at any instant: callers
//! that ask for a refresh while one is running wait for its outcome instead
//! of issuing their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use super::events::SessionEvent;
use super::refresher::SessionRefresher;
use super::store::TokenStore;
use crate::types::{ClientError, Result};

type Waiters = Vec<oneshot::Sender<Result<String>>>;

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Shared session state for the API pipeline and the chat socket
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn SessionRefresher>,
    refresh_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
    /// `Some` while a refresh is running; holds callers waiting on it
    in_flight: Mutex<Option<Waiters>>,
    /// Set on terminal failure, cleared by `login`
    expired: AtomicBool,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn SessionRefresher>,
        refresh_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            refresher,
            refresh_timeout,
            events,
            in_flight: Mutex::new(None),
            expired: AtomicBool::new(false),
        }
    }

    /// Current access token
    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    /// Locally stored device identifier
    pub fn device_id(&self) -> Option<String> {
        self.store.device_id()
    }

    /// Make sure a device identifier exists, generating one if needed
    pub fn ensure_device_id(&self) -> Result<String> {
        if let Some(id) = self.store.device_id() {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.store.set_device_id(&id)?;
        info!(device_id = %id, "Generated device identifier");
        Ok(id)
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether the session ended and needs a fresh login
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Store the access token obtained from a login flow
    pub fn login(&self, access_token: &str) -> Result<()> {
        self.store.set_access_token(access_token)?;
        self.expired.store(false, Ordering::SeqCst);
        info!("Session started");
        Ok(())
    }

    /// Drop the stored access token
    pub fn logout(&self) -> Result<()> {
        self.store.clear_access_token()?;
        let _ = self.events.send(SessionEvent::LoggedOut {
            at: chrono::Utc::now(),
        });
        info!("Session ended by logout");
        Ok(())
    }

    /// Obtain a new access token.
    ///
    /// Joins the running refresh if there is one. On success the token is
    /// stored; on failure the session is terminated (token cleared, one
    /// `Expired` event) and every joined caller receives the same error.
    pub async fn refresh(&self) -> Result<String> {
        if self.is_expired() {
            return Err(ClientError::SessionExpired);
        }

        let waiter = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.as_mut() {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    *in_flight = Some(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            debug!("Refresh already running, waiting for its outcome");
            return rx
                .await
                .unwrap_or_else(|_| Err(ClientError::Internal("Refresh abandoned".into())));
        }

        let flight = FlightGuard {
            manager: self,
            settled: false,
        };
        let outcome = self.run_refresh().await;
        flight.settle(&outcome);
        outcome
    }

    /// Terminate the session: clear the token and notify subscribers once
    pub fn expire(&self, reason: &str) {
        if let Err(e) = self.store.clear_access_token() {
            warn!(error = %e, "Failed to clear access token");
        }
        if !self.expired.swap(true, Ordering::SeqCst) {
            warn!(reason = %reason, "Session expired, login required");
            let _ = self.events.send(SessionEvent::expired(reason));
        }
    }

    async fn run_refresh(&self) -> Result<String> {
        info!("Refreshing access token");

        let outcome = match tokio::time::timeout(self.refresh_timeout, self.refresher.refresh()).await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::RefreshFailed {
                status: None,
                detail: format!("Refresh timed out after {:?}", self.refresh_timeout),
            }),
        };

        match outcome {
            Ok(_) if self.is_expired() => {
                warn!("Session expired during refresh, discarding new token");
                Err(ClientError::SessionExpired)
            }
            Ok(token) => {
                self.store.set_access_token(&token)?;
                let _ = self.events.send(SessionEvent::Refreshed {
                    at: chrono::Utc::now(),
                });
                info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                let err = match e {
                    ClientError::RefreshFailed { .. } | ClientError::SessionExpired => e,
                    other => ClientError::RefreshFailed {
                        status: other.status_code().map(|s| s.as_u16()),
                        detail: other.to_string(),
                    },
                };
                self.expire(&err.to_string());
                Err(err)
            }
        }
    }

    fn take_waiters(&self) -> Waiters {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default()
    }
}

/// Releases the single-flight slot even if the leading caller is dropped
struct FlightGuard<'a> {
    manager: &'a SessionManager,
    settled: bool,
}

impl FlightGuard<'_> {
    fn settle(mut self, outcome: &Result<String>) {
        self.settled = true;
        for waiter in self.manager.take_waiters() {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        for waiter in self.manager.take_waiters() {
            let _ = waiter.send(Err(ClientError::Internal("Refresh abandoned".into())));
        }
    }
}
