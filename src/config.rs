//! Configuration for the challenge client
//!
//! CLI arguments and environment variable handling using clap. Library users
//! can skip clap entirely and build a [`ClientConfig`] directly.

use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{ClientError, Result};

/// Default refresh endpoint, relative to the API base URL
pub const DEFAULT_REFRESH_PATH: &str = "/users/refresh";

/// Default login entry point used for session-expiry redirects
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Challenge client - authenticated API and chat access
#[derive(Parser, Debug, Clone)]
#[command(name = "challenge-client")]
#[command(about = "Authenticated API pipeline and chat client for the challenge app")]
pub struct Args {
    /// Base URL of the REST API
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:3000")]
    pub api_base_url: String,

    /// Base URL of the chat WebSocket endpoint (room id is appended)
    #[arg(long, env = "CHAT_URL", default_value = "ws://localhost:3000/ws/chat")]
    pub chat_url: String,

    /// Token refresh endpoint path
    #[arg(long, env = "REFRESH_PATH", default_value = DEFAULT_REFRESH_PATH)]
    pub refresh_path: String,

    /// Login entry point; session-expiry redirects go here
    #[arg(long, env = "LOGIN_PATH", default_value = DEFAULT_LOGIN_PATH)]
    pub login_path: String,

    /// Path of the JSON token store (in-memory when unset)
    #[arg(long, env = "TOKEN_STORE")]
    pub token_store: Option<PathBuf>,

    /// Device identifier sent as `Device-Id` (generated and persisted when unset)
    #[arg(long, env = "DEVICE_ID")]
    pub device_id: Option<String>,

    /// Upper bound on a single token refresh call, in milliseconds
    #[arg(long, env = "REFRESH_TIMEOUT_MS", default_value = "10000")]
    pub refresh_timeout_ms: u64,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Consecutive chat reconnects allowed for unauthorized signals
    #[arg(long, env = "MAX_AUTH_RECOVERIES", default_value = "3")]
    pub max_auth_recoveries: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations exposed by the binary
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Issue one API call through the authenticated pipeline
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to the API base URL
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Join a chat room; stdin lines are sent, inbound frames printed
    Chat {
        /// Room identifier
        room: String,
    },
    /// Store an access token obtained from a login flow
    Login {
        /// Access token
        token: String,
    },
    /// Clear the stored access token
    Logout,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        Url::parse(&self.api_base_url)
            .map_err(|e| format!("API_BASE_URL is not a valid URL: {}", e))?;

        let chat = Url::parse(&self.chat_url)
            .map_err(|e| format!("CHAT_URL is not a valid URL: {}", e))?;
        if chat.scheme() != "ws" && chat.scheme() != "wss" {
            return Err("CHAT_URL must use ws:// or wss://".to_string());
        }

        if !self.refresh_path.starts_with('/') {
            return Err("REFRESH_PATH must start with '/'".to_string());
        }

        if self.refresh_timeout_ms == 0 {
            return Err("REFRESH_TIMEOUT_MS must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Library-facing client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API base URL; request paths are joined onto it
    pub base_url: Url,
    /// Chat WebSocket base URL
    pub chat_url: Url,
    /// Refresh endpoint path
    pub refresh_path: String,
    /// Login entry point
    pub login_path: String,
    /// Bound on the refresh call
    pub refresh_timeout: Duration,
    /// Bound on every other request
    pub request_timeout: Duration,
    /// Consecutive unauthorized reconnects tolerated by the chat socket
    pub max_auth_recoveries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:3000").expect("valid default URL"),
            chat_url: Url::parse("ws://localhost:3000/ws/chat").expect("valid default URL"),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_auth_recoveries: 3,
        }
    }
}

impl ClientConfig {
    /// Build from parsed CLI arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let base_url = Url::parse(&args.api_base_url)
            .map_err(|e| ClientError::Config(format!("API_BASE_URL: {}", e)))?;
        let chat_url = Url::parse(&args.chat_url)
            .map_err(|e| ClientError::Config(format!("CHAT_URL: {}", e)))?;

        Ok(Self {
            base_url,
            chat_url,
            refresh_path: args.refresh_path.clone(),
            login_path: args.login_path.clone(),
            refresh_timeout: Duration::from_millis(args.refresh_timeout_ms),
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            max_auth_recoveries: args.max_auth_recoveries,
        })
    }

    /// Config pointing both the API and chat endpoints at one server
    pub fn for_server(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("base URL: {}", e)))?;
        let mut chat_url = base_url.join("/ws/chat").map_err(|e| {
            ClientError::Config(format!("chat URL: {}", e))
        })?;
        let scheme = if base_url.scheme() == "https" { "wss" } else { "ws" };
        chat_url
            .set_scheme(scheme)
            .map_err(|_| ClientError::Config("chat URL scheme".to_string()))?;

        Ok(Self {
            base_url,
            chat_url,
            ..Default::default()
        })
    }

    /// Absolute URL of the refresh endpoint
    pub fn refresh_url(&self) -> Result<Url> {
        self.resolve(&self.refresh_path)
    }

    /// Resolve an API path against the base URL
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Config(format!("Invalid API path {}: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.refresh_path, "/users/refresh");
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.refresh_timeout, Duration::from_secs(10));
        assert_eq!(
            config.refresh_url().unwrap().as_str(),
            "http://localhost:3000/users/refresh"
        );
    }

    #[test]
    fn test_for_server_derives_chat_url() {
        let config = ClientConfig::for_server("https://api.example.com").unwrap();
        assert_eq!(config.chat_url.as_str(), "wss://api.example.com/ws/chat");

        let config = ClientConfig::for_server("http://127.0.0.1:9000").unwrap();
        assert_eq!(config.chat_url.as_str(), "ws://127.0.0.1:9000/ws/chat");
    }

    #[test]
    fn test_resolve_relative_path() {
        let config = ClientConfig::default();
        let url = config.resolve("/challenges/42").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/challenges/42");
    }
}
