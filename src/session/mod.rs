//! Session credentials and the shared token refresh service
//!
//! Provides:
//! - Access token / device id persistence (`TokenStore`)
//! - The refresh primitive (`SessionRefresher`, `HttpSessionRefresher`)
//! - Single-flight refresh and terminal-session handling (`SessionManager`)
//! - Session lifecycle events for the application layer

pub mod events;
pub mod manager;
pub mod refresher;
pub mod store;

pub use events::{LoginRedirect, SessionEvent};
pub use manager::SessionManager;
pub use refresher::{HttpSessionRefresher, SessionRefresher};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY, DEVICE_ID_KEY};
