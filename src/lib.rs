//! Challenge client - authenticated API pipeline and chat transport
//!
//! Provides the client-side session plumbing for the challenge app:
//!
//! ## Components
//!
//! - **Session**: access token and device id storage, single-flight token
//!   refresh, session expiry notifications
//! - **HTTP**: API client that attaches credentials, renews the token once on
//!   401 and replays requests that arrived during the refresh
//! - **Realtime**: per-room chat WebSocket with ordered sends and
//!   reconnect-on-unauthorized

pub mod config;
pub mod http;
pub mod realtime;
pub mod session;
pub mod types;

pub use config::{Args, ClientConfig};
pub use http::{ApiClient, ApiRequest, ApiResponse};
pub use realtime::{ChatConfig, ChatSocket, ConnectionState};
pub use session::{SessionEvent, SessionManager};
pub use types::{ClientError, Result};
