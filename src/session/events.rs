//! Session lifecycle events
//!
//! Terminal failures are published here instead of navigating from inside the
//! network layer. The application subscribes and shows the notice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The refresh credential was rejected; the user must log in again
    Expired {
        reason: String,
        at: DateTime<Utc>,
    },
    /// A new access token replaced the previous one
    Refreshed { at: DateTime<Utc> },
    /// The user logged out
    LoggedOut { at: DateTime<Utc> },
}

impl SessionEvent {
    pub fn expired(reason: impl Into<String>) -> Self {
        Self::Expired {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Decides where a session-expiry notice should send the user
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    login_path: String,
}

impl LoginRedirect {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }

    /// Redirect target, or `None` when `current_path` already is the login entry point
    pub fn target(&self, current_path: &str) -> Option<&str> {
        let current = current_path
            .split(['?', '#'])
            .next()
            .unwrap_or(current_path)
            .trim_end_matches('/');
        let login = self.login_path.trim_end_matches('/');

        if current == login {
            None
        } else {
            Some(&self.login_path)
        }
    }
}
